//! Canonical Schema Module
//! Column names and lookup tables shared by the normalizer, filters and views.

use polars::prelude::*;
use std::collections::HashSet;

pub const LIGNE: &str = "ligne";
pub const MODE: &str = "mode";
pub const THEMATIQUE: &str = "thematique";
pub const INDICATEUR: &str = "indicateur";
pub const ANNEE: &str = "annee";
pub const TRIMESTRE: &str = "trimestre";
pub const VALEUR_REELLE: &str = "valeur_reelle";
pub const VALEUR_OBJECTIF: &str = "valeur_objectif";
pub const PERIODE_LABEL: &str = "periode_label";
pub const SORT_KEY: &str = "sort_key";

/// Source headers that carry a different name in the canonical schema.
pub const RENAME_MAP: &[(&str, &str)] = &[
    ("resultat_indicateurs_en", VALEUR_REELLE),
    ("objectif_reference_contrat", VALEUR_OBJECTIF),
];

/// Text fields that keep their source name.
pub const CANONICAL_FIELDS: &[&str] = &[LIGNE, MODE, THEMATIQUE, INDICATEUR, TRIMESTRE];

/// Measured / target columns coerced to Float64.
pub const NUMERIC_FIELDS: &[&str] = &[VALEUR_REELLE, VALEUR_OBJECTIF];

pub const QUARTER_INDEX: &[(&str, i64)] = &[("T1", 1), ("T2", 2), ("T3", 3), ("T4", 4)];

/// Label used in `periode_label` when the year is known but the quarter is not.
pub const UNKNOWN_QUARTER_LABEL: &str = "n/d";

/// Canonical name for a trimmed, lower-cased source header.
pub fn canonical_name(header: &str) -> &str {
    RENAME_MAP
        .iter()
        .find(|(source, _)| *source == header)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(header)
}

/// Quarter position within a year, 0 when the label is unknown or missing.
pub fn quarter_index(trimestre: Option<&str>) -> i64 {
    trimestre
        .and_then(|q| {
            QUARTER_INDEX
                .iter()
                .find(|(label, _)| *label == q)
                .map(|(_, index)| *index)
        })
        .unwrap_or(0)
}

/// Chronological ordering key for a (year, quarter) pair, `None` when the
/// year is too large to encode.
pub fn sort_key(annee: i64, trimestre: Option<&str>) -> Option<i64> {
    annee
        .checked_mul(10)
        .and_then(|key| key.checked_add(quarter_index(trimestre)))
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

/// Names from `required` that are not columns of `df`.
pub fn missing_columns(df: &DataFrame, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !has_column(df, name))
        .map(|name| name.to_string())
        .collect()
}

/// Make header labels usable as column names: empty labels become
/// `unnamed_{position}` and repeated labels get a `.N` suffix.
pub fn unique_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for (position, label) in labels.into_iter().enumerate() {
        let mut base: String = label.into();
        if base.is_empty() {
            base = format!("unnamed_{}", position);
        }

        let mut candidate = base.clone();
        let mut suffix = 1;
        while !used.insert(candidate.clone()) {
            candidate = format!("{}.{}", base, suffix);
            suffix += 1;
        }
        out.push(candidate);
    }

    out
}
