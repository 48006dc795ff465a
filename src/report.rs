//! Terminal rendering of a [`Dashboard`], plus JSON / CSV output.

use crate::dashboard::Dashboard;
use crate::data::loader::DEFAULT_SEPARATOR;
use crate::data::FilterOptions;
use crate::stats::{GroupScore, View};
use polars::prelude::*;
use std::fmt::Write as _;
use std::io::Write;

fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2} %", v))
        .unwrap_or_else(|| "n/d".to_string())
}

fn unavailable<T>(view: &View<T>, out: &mut String, what: &str) -> bool {
    if let View::Unavailable { missing } = view {
        let _ = writeln!(out, "  {} indisponible (colonnes manquantes : {})", what, missing.join(", "));
        return true;
    }
    false
}

fn write_scores(out: &mut String, rows: &[GroupScore]) {
    let width = rows.iter().map(|r| r.key.chars().count()).max().unwrap_or(0);
    for row in rows {
        let _ = writeln!(
            out,
            "  {:<width$}  {:>6.1}  ({} mesures)",
            row.key,
            row.mean,
            row.count,
            width = width
        );
    }
}

/// Plain-text dashboard.
pub fn render_text(dashboard: &Dashboard) -> String {
    let mut out = String::new();
    let summary = &dashboard.summary;

    let _ = writeln!(out, "Performance globale ({} lignes)", summary.rows);
    let _ = writeln!(out, "  Taux de réussite moyen      {}", percent(summary.mean_reel));
    let _ = writeln!(out, "  Objectif contractuel moyen  {}", percent(summary.mean_objectif));
    if let Some(delta) = summary.delta {
        let _ = writeln!(out, "  Écart à l'objectif          {:+.2} pts", delta);
    }

    let _ = writeln!(out, "\nÉvolution dans le temps");
    if !unavailable(&dashboard.trend, &mut out, "Évolution") {
        if let Some(trend) = dashboard.trend.available() {
            for point in &trend.points {
                let _ = writeln!(
                    out,
                    "  {:<12}  réel {:>6.2}  objectif {}",
                    point.periode_label,
                    point.reel,
                    point
                        .objectif
                        .map(|v| format!("{:>6.2}", v))
                        .unwrap_or_else(|| "   n/d".to_string())
                );
            }
        }
    }

    let _ = writeln!(out, "\nLignes à surveiller");
    if !unavailable(&dashboard.worst_lines, &mut out, "Classement des lignes") {
        if let Some(ranked) = dashboard.worst_lines.available() {
            write_scores(&mut out, &ranked.rows);
        }
    }

    let _ = writeln!(out, "\nPerformance par thématique");
    if !unavailable(&dashboard.categories, &mut out, "Répartition par thématique") {
        if let Some(categories) = dashboard.categories.available() {
            write_scores(&mut out, &categories.rows);
            if let Some(axis) = categories.axis {
                let _ = writeln!(out, "  échelle suggérée [{:.1}, {:.1}]", axis.lower, axis.upper);
            }
        }
    }

    out
}

pub fn render_options(options: &FilterOptions) -> String {
    let years: Vec<String> = options.years.iter().map(|y| y.to_string()).collect();
    let mut out = String::new();
    let _ = writeln!(out, "Années       {}", years.join(", "));
    let _ = writeln!(out, "Modes        {}", options.modes.join(", "));
    let _ = writeln!(out, "Thématiques  {}", options.thematiques.join(", "));
    out
}

/// Serialize the dashboard views as pretty JSON.
pub fn render_json(dashboard: &Dashboard) -> serde_json::Result<String> {
    serde_json::to_string_pretty(dashboard)
}

/// Write the filtered rows as `;`-separated CSV.
pub fn write_rows<W: Write>(dashboard: &Dashboard, writer: W) -> PolarsResult<()> {
    let mut rows = dashboard.rows.clone();
    CsvWriter::new(writer)
        .include_header(true)
        .with_separator(DEFAULT_SEPARATOR)
        .finish(&mut rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{normalize, FilterCriteria};

    fn dashboard() -> Dashboard {
        let raw = df!(
            "annee" => ["2023", "2023"],
            "trimestre" => ["T1", "T2"],
            "ligne" => ["A", "A"],
            "resultat_indicateurs_en" => ["95,0", "90,0"],
            "objectif_reference_contrat" => ["98", "98"]
        )
        .unwrap();
        Dashboard::build(&normalize(&raw).unwrap(), &FilterCriteria::new()).unwrap()
    }

    #[test]
    fn test_text_report_mentions_unavailable_views() {
        let text = render_text(&dashboard());

        assert!(text.contains("92.50 %"));
        assert!(text.contains("-5.50 pts"));
        assert!(text.contains("2023 - T1"));
        assert!(text.contains("thematique"));
    }

    #[test]
    fn test_json_report_tags_views() {
        let json: serde_json::Value = serde_json::from_str(&render_json(&dashboard()).unwrap()).unwrap();

        assert_eq!(json["trend"]["status"], "available");
        assert_eq!(json["categories"]["status"], "unavailable");
        assert_eq!(json["trend"]["points"][1]["periode_label"], "2023 - T2");
    }

    #[test]
    fn test_rows_are_written_as_csv() {
        let mut buffer = Vec::new();
        write_rows(&dashboard(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.lines().next().unwrap().contains("valeur_reelle"));
        assert_eq!(text.lines().count(), 3);
    }
}
