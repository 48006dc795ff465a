//! Data Normalizer Module
//! Maps the raw source table onto the canonical indicator schema.

use crate::data::schema::{
    canonical_name, has_column, sort_key, unique_labels, ANNEE, CANONICAL_FIELDS,
    NUMERIC_FIELDS, PERIODE_LABEL, SORT_KEY, TRIMESTRE, UNKNOWN_QUARTER_LABEL, VALEUR_REELLE,
};
use polars::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
}

/// Parse a decimal that may use a comma separator (`"98,5"`).
///
/// Unparseable and non-finite values yield `None`.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Parse a year, accepting integral floats such as `"2023.0"`.
pub fn parse_year(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| parse_decimal(trimmed).and_then(integral_year))
}

/// Whole, finite values inside the `i64` range; anything else is missing.
fn integral_year(value: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.is_finite() && value.fract() == 0.0 && in_range).then_some(value as i64)
}

/// Turns a raw source table into the canonical indicator table.
pub struct Normalizer;

impl Normalizer {
    /// Run every normalization step on a copy of `raw`.
    #[tracing::instrument(skip_all, fields(rows = raw.height()))]
    pub fn normalize(raw: &DataFrame) -> Result<DataFrame, NormalizeError> {
        let mut df = Self::standardize_headers(raw)?;

        for name in NUMERIC_FIELDS {
            if has_column(&df, name) {
                let coerced = Self::coerce_float(df.column(name)?)?;
                df.with_column(coerced)?;
            }
        }

        if has_column(&df, ANNEE) {
            let coerced = Self::coerce_year(df.column(ANNEE)?)?;
            df.with_column(coerced)?;
        }

        for name in CANONICAL_FIELDS {
            if has_column(&df, name) {
                let coerced = Self::coerce_text(df.column(name)?)?;
                df.with_column(coerced)?;
            }
        }

        if has_column(&df, ANNEE) && has_column(&df, TRIMESTRE) {
            let (annee, label, key) = Self::derive_period(&df)?;
            df.with_column(annee)?;
            df.with_column(label)?;
            df.with_column(key)?;
        }

        let before = df.height();
        let df = if has_column(&df, VALEUR_REELLE) {
            df.lazy()
                .filter(col(VALEUR_REELLE).is_not_null())
                .collect()?
        } else {
            debug!("No measured value column, every row dropped");
            df.clear()
        };

        info!(
            kept = df.height(),
            dropped = before - df.height(),
            "Normalization complete"
        );
        Ok(df)
    }

    /// Trim, lower-case and rename headers to their canonical names.
    pub fn standardize_headers(raw: &DataFrame) -> Result<DataFrame, NormalizeError> {
        let names = unique_labels(raw.get_column_names().iter().map(|name| {
            let cleaned = name.trim().to_lowercase();
            canonical_name(&cleaned).to_string()
        }));

        let columns: Vec<Column> = raw
            .get_columns()
            .iter()
            .zip(names)
            .map(|(column, name)| column.clone().with_name(name.into()))
            .collect();

        Ok(DataFrame::new(columns)?)
    }

    /// Best-effort Float64 coercion with comma decimal support.
    pub fn coerce_float(column: &Column) -> Result<Column, NormalizeError> {
        let values: Vec<Option<f64>> = match column.dtype() {
            DataType::String => column
                .str()?
                .into_iter()
                .map(|v| v.and_then(parse_decimal))
                .collect(),
            _ => column
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| v.filter(|x| x.is_finite()))
                .collect(),
        };

        Ok(Column::new(column.name().clone(), values))
    }

    pub fn coerce_year(column: &Column) -> Result<Column, NormalizeError> {
        let values: Vec<Option<i64>> = match column.dtype() {
            DataType::String => column
                .str()?
                .into_iter()
                .map(|v| v.and_then(parse_year))
                .collect(),
            dtype if dtype.is_integer() => {
                column.cast(&DataType::Int64)?.i64()?.into_iter().collect()
            }
            _ => column
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| v.and_then(integral_year))
                .collect(),
        };

        Ok(Column::new(column.name().clone(), values))
    }

    /// Trimmed text; blank cells become null.
    pub fn coerce_text(column: &Column) -> Result<Column, NormalizeError> {
        let as_text = column.cast(&DataType::String)?;
        let values: Vec<Option<String>> = as_text
            .str()?
            .into_iter()
            .map(|v| {
                v.map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .collect();

        Ok(Column::new(column.name().clone(), values))
    }

    /// Build `periode_label` and `sort_key` from `annee` and `trimestre`.
    ///
    /// A year whose key would overflow is treated like an unparseable one, so
    /// the returned `annee` column replaces the input.
    fn derive_period(df: &DataFrame) -> Result<(Column, Column, Column), NormalizeError> {
        let annees = df.column(ANNEE)?.i64()?;
        let trimestres = df.column(TRIMESTRE)?.str()?;

        let mut years: Vec<Option<i64>> = Vec::with_capacity(df.height());
        let mut labels: Vec<Option<String>> = Vec::with_capacity(df.height());
        let mut keys: Vec<Option<i64>> = Vec::with_capacity(df.height());

        for (annee, trimestre) in annees.into_iter().zip(trimestres.into_iter()) {
            let period = annee.and_then(|annee| sort_key(annee, trimestre).map(|key| (annee, key)));
            match period {
                Some((annee, key)) => {
                    years.push(Some(annee));
                    labels.push(Some(format!(
                        "{} - {}",
                        annee,
                        trimestre.unwrap_or(UNKNOWN_QUARTER_LABEL)
                    )));
                    keys.push(Some(key));
                }
                None => {
                    if annee.is_some() {
                        debug!(?annee, "Year out of range for a period key");
                    }
                    years.push(None);
                    labels.push(None);
                    keys.push(None);
                }
            }
        }

        Ok((
            Column::new(ANNEE.into(), years),
            Column::new(PERIODE_LABEL.into(), labels),
            Column::new(SORT_KEY.into(), keys),
        ))
    }
}

/// Normalize a raw table (see [`Normalizer::normalize`]).
pub fn normalize(raw: &DataFrame) -> Result<DataFrame, NormalizeError> {
    Normalizer::normalize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::{LIGNE, VALEUR_OBJECTIF};

    fn raw_table() -> DataFrame {
        df!(
            " ANNEE " => [Some("2023"), Some("2023"), Some("abc"), Some("2024"), Some("2024")],
            "Trimestre" => [Some("T2"), Some("T1"), Some("T3"), None, Some("T4")],
            "Ligne" => [Some("A"), Some(" B "), Some("C"), Some("D"), Some("")],
            "resultat_indicateurs_en" => [Some("98,5"), Some("abc"), Some("90"), Some("88.25"), None],
            "OBJECTIF_REFERENCE_CONTRAT" => [Some("98"), Some("97,5"), None, Some("x"), Some("95")],
            "commentaire" => [Some("ok"), None, Some("late"), None, None]
        )
        .unwrap()
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("98,5"), Some(98.5));
        assert_eq!(parse_decimal(" 90 "), Some(90.0));
        assert_eq!(parse_decimal("abc"), None);
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("inf"), None);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2023"), Some(2023));
        assert_eq!(parse_year("2023.0"), Some(2023));
        assert_eq!(parse_year("2023.5"), None);
        assert_eq!(parse_year("deux mille"), None);
        assert_eq!(parse_year("1e19"), None);
        assert_eq!(parse_year("-1e19"), None);
        assert_eq!(parse_year("9223372036854775808"), None);
    }

    #[test]
    fn test_year_out_of_range_is_missing() {
        let raw = df!(
            "annee" => ["1e19", "922337203685477581", "2023"],
            "trimestre" => ["T1", "T1", "T1"],
            "ligne" => ["A", "B", "C"],
            "resultat_indicateurs_en" => ["90", "91", "92"]
        )
        .unwrap();
        let df = normalize(&raw).unwrap();

        assert_eq!(df.height(), 3);
        let years: Vec<Option<i64>> = df.column(ANNEE).unwrap().i64().unwrap().into_iter().collect();
        let labels: Vec<Option<&str>> = df.column(PERIODE_LABEL).unwrap().str().unwrap().into_iter().collect();
        let keys: Vec<Option<i64>> = df.column(SORT_KEY).unwrap().i64().unwrap().into_iter().collect();

        assert_eq!(years, vec![None, None, Some(2023)]);
        assert_eq!(labels, vec![None, None, Some("2023 - T1")]);
        assert_eq!(keys, vec![None, None, Some(20231)]);
    }

    #[test]
    fn test_fractional_float_year_is_missing() {
        let raw = df!(
            "annee" => [2023.7f64, 2024.0, f64::INFINITY],
            "trimestre" => ["T2", "T3", "T4"],
            "resultat_indicateurs_en" => [90.0f64, 91.0, 92.0]
        )
        .unwrap();
        let df = normalize(&raw).unwrap();

        let years: Vec<Option<i64>> = df.column(ANNEE).unwrap().i64().unwrap().into_iter().collect();
        let keys: Vec<Option<i64>> = df.column(SORT_KEY).unwrap().i64().unwrap().into_iter().collect();
        assert_eq!(years, vec![None, Some(2024), None]);
        assert_eq!(keys, vec![None, Some(20243), None]);
    }

    #[test]
    fn test_headers_are_canonical_and_unknown_columns_kept() {
        let df = normalize(&raw_table()).unwrap();
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();

        for expected in [
            ANNEE,
            TRIMESTRE,
            LIGNE,
            VALEUR_REELLE,
            VALEUR_OBJECTIF,
            "commentaire",
            PERIODE_LABEL,
            SORT_KEY,
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_rows_without_measurement_are_dropped() {
        let df = normalize(&raw_table()).unwrap();

        // "abc" and null measurements are gone
        assert_eq!(df.height(), 3);
        assert_eq!(df.column(VALEUR_REELLE).unwrap().null_count(), 0);

        let values: Vec<Option<f64>> = df.column(VALEUR_REELLE).unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(values, vec![Some(98.5), Some(90.0), Some(88.25)]);

        let targets: Vec<Option<f64>> = df.column(VALEUR_OBJECTIF).unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(targets, vec![Some(98.0), None, None]);
    }

    #[test]
    fn test_unparseable_year_keeps_row_without_period() {
        let df = normalize(&raw_table()).unwrap();
        let lignes = df.column(LIGNE).unwrap().str().unwrap();
        let labels = df.column(PERIODE_LABEL).unwrap().str().unwrap();
        let keys = df.column(SORT_KEY).unwrap().i64().unwrap();

        let row = (0..df.height()).find(|&i| lignes.get(i) == Some("C")).unwrap();
        assert_eq!(df.column(ANNEE).unwrap().i64().unwrap().get(row), None);
        assert_eq!(labels.get(row), None);
        assert_eq!(keys.get(row), None);
    }

    #[test]
    fn test_period_label_and_sort_key() {
        let df = normalize(&raw_table()).unwrap();
        let labels: Vec<Option<&str>> = df.column(PERIODE_LABEL).unwrap().str().unwrap().into_iter().collect();
        let keys: Vec<Option<i64>> = df.column(SORT_KEY).unwrap().i64().unwrap().into_iter().collect();

        assert_eq!(labels, vec![Some("2023 - T2"), None, Some("2024 - n/d")]);
        assert_eq!(keys, vec![Some(20232), None, Some(20240)]);
    }

    #[test]
    fn test_text_fields_are_trimmed() {
        let raw = df!(
            "ligne" => [Some(" B "), Some("   ")],
            "resultat_indicateurs_en" => ["1", "2"]
        )
        .unwrap();
        let df = normalize(&raw).unwrap();
        let lignes: Vec<Option<&str>> = df.column(LIGNE).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(lignes, vec![Some("B"), None]);
    }

    #[test]
    fn test_numeric_source_columns_are_cast() {
        let raw = df!(
            "annee" => [2022i64, 2023],
            "trimestre" => ["T4", "T1"],
            "resultat_indicateurs_en" => [91.0f64, f64::NAN]
        )
        .unwrap();
        let df = normalize(&raw).unwrap();

        assert_eq!(df.height(), 1);
        assert_eq!(df.column(SORT_KEY).unwrap().i64().unwrap().get(0), Some(20224));
    }

    #[test]
    fn test_missing_measure_column_empties_table() {
        let raw = df!("ligne" => ["A", "B"]).unwrap();
        let df = normalize(&raw).unwrap();
        assert_eq!(df.height(), 0);
    }

    #[test]
    fn test_input_is_not_modified() {
        let raw = raw_table();
        let _ = normalize(&raw).unwrap();
        assert_eq!(raw.height(), 5);
        assert!(raw.column("resultat_indicateurs_en").is_ok());
    }
}
