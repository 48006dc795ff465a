//! Filter Engine Module
//! Equality / membership constraints over categorical columns.

use crate::data::schema::{ANNEE, MODE, THEMATIQUE};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

/// Choices the UI offers to mean "no restriction".
pub const ALL_SENTINELS: &[&str] = &["Tous", "Toutes", "all", ""];

/// A cell value a constraint can compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Int(v) => write!(f, "{}", v),
            FilterValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

/// Single-select value with an "everything" sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    #[default]
    All,
    Only(FilterValue),
}

impl Selection {
    /// Map a UI choice to a selection; `Tous` / `Toutes` mean no restriction.
    pub fn from_choice(choice: &str) -> Self {
        let trimmed = choice.trim();
        if ALL_SENTINELS.iter().any(|s| s.eq_ignore_ascii_case(trimmed)) {
            Selection::All
        } else {
            Selection::Only(FilterValue::Text(trimmed.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    /// Keep rows whose value is one of these; an empty list keeps every row.
    AnyOf(Vec<FilterValue>),
    Equals(Selection),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConstraint {
    pub field: String,
    pub rule: Rule,
}

/// Constraints combined with logical AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub constraints: Vec<FieldConstraint>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, rule: Rule) -> Self {
        self.constraints.push(FieldConstraint {
            field: field.to_string(),
            rule,
        });
        self
    }

    pub fn years<I: IntoIterator<Item = i64>>(self, years: I) -> Self {
        let values = years.into_iter().map(FilterValue::Int).collect();
        self.with(ANNEE, Rule::AnyOf(values))
    }

    pub fn mode(self, selection: Selection) -> Self {
        self.with(MODE, Rule::Equals(selection))
    }

    pub fn thematique(self, selection: Selection) -> Self {
        self.with(THEMATIQUE, Rule::Equals(selection))
    }

    /// The constraints that apply to any of `fields`, in their original order.
    pub fn restricted_to(&self, fields: &[&str]) -> Self {
        Self {
            constraints: self
                .constraints
                .iter()
                .filter(|c| fields.contains(&c.field.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.constraints.iter().all(|c| match &c.rule {
            Rule::AnyOf(values) => values.is_empty(),
            Rule::Equals(selection) => *selection == Selection::All,
        })
    }
}

/// Literal for `value` in the type of the target column, or `None` when the
/// value can never match (e.g. text against an integer column).
fn typed_literal(value: &FilterValue, dtype: &DataType) -> Option<Expr> {
    match (value, dtype) {
        (FilterValue::Int(v), dt) if dt.is_integer() => Some(lit(*v)),
        (FilterValue::Int(v), dt) if dt.is_float() => Some(lit(*v as f64)),
        (FilterValue::Text(v), dt) if dt.is_integer() => v.trim().parse::<i64>().ok().map(lit),
        (FilterValue::Text(v), dt) if dt.is_float() => v.trim().parse::<f64>().ok().map(lit),
        (value, DataType::String) => Some(lit(value.to_string())),
        _ => None,
    }
}

fn constraint_expr(constraint: &FieldConstraint, dtype: &DataType) -> Option<Expr> {
    let column = col(constraint.field.as_str());
    match &constraint.rule {
        Rule::AnyOf(values) if values.is_empty() => None,
        Rule::AnyOf(values) => Some(values.iter().fold(lit(false), |acc, value| {
            match typed_literal(value, dtype) {
                Some(literal) => acc.or(column.clone().eq(literal)),
                None => acc,
            }
        })),
        Rule::Equals(Selection::All) => None,
        Rule::Equals(Selection::Only(value)) => Some(
            typed_literal(value, dtype)
                .map(|literal| column.clone().eq(literal))
                .unwrap_or_else(|| lit(false)),
        ),
    }
}

/// Keep the rows of `df` that satisfy every constraint.
///
/// Constraints on absent columns are ignored. Never fails: an internal error
/// is logged and yields an empty table with the input schema.
pub fn apply_filters(df: &DataFrame, criteria: &FilterCriteria) -> DataFrame {
    let predicates: Vec<Expr> = criteria
        .constraints
        .iter()
        .filter_map(|constraint| {
            let Ok(column) = df.column(&constraint.field) else {
                debug!(field = %constraint.field, "Filter on absent column ignored");
                return None;
            };
            constraint_expr(constraint, column.dtype())
        })
        .collect();

    let Some(predicate) = predicates.into_iter().reduce(|acc, p| acc.and(p)) else {
        return df.clone();
    };

    match df.clone().lazy().filter(predicate).collect() {
        Ok(filtered) => filtered,
        Err(e) => {
            warn!(error = %e, "Filter evaluation failed, returning no rows");
            df.clear()
        }
    }
}

/// Selectable filter values present in a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub years: Vec<i64>,
    pub modes: Vec<String>,
    pub thematiques: Vec<String>,
}

impl FilterOptions {
    /// Every value present in `df`, ignoring any selection.
    pub fn from_table(df: &DataFrame) -> Self {
        Self {
            years: Self::unique_years(df),
            modes: Self::unique_text(df, MODE),
            thematiques: Self::unique_text(df, THEMATIQUE),
        }
    }

    /// Options that narrow with the selections made upstream: years come from
    /// the whole table, modes from the selected years, and thematiques from
    /// the selected years and mode.
    pub fn cascading(df: &DataFrame, criteria: &FilterCriteria) -> Self {
        let by_year = apply_filters(df, &criteria.restricted_to(&[ANNEE]));
        let by_year_and_mode = apply_filters(df, &criteria.restricted_to(&[ANNEE, MODE]));

        Self {
            years: Self::unique_years(df),
            modes: Self::unique_text(&by_year, MODE),
            thematiques: Self::unique_text(&by_year_and_mode, THEMATIQUE),
        }
    }

    fn unique_years(df: &DataFrame) -> Vec<i64> {
        df.column(ANNEE)
            .and_then(|c| c.cast(&DataType::Int64))
            .ok()
            .map(|c| {
                c.i64()
                    .map(|ca| ca.into_iter().flatten().collect::<BTreeSet<i64>>())
                    .unwrap_or_default()
            })
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }

    /// Sorted distinct non-null values of a text column.
    fn unique_text(df: &DataFrame, name: &str) -> Vec<String> {
        df.column(name)
            .and_then(|c| c.cast(&DataType::String))
            .ok()
            .map(|c| {
                c.str()
                    .map(|ca| {
                        ca.into_iter()
                            .flatten()
                            .map(str::to_string)
                            .collect::<BTreeSet<String>>()
                    })
                    .unwrap_or_default()
            })
            .map(|set| set.into_iter().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::schema::LIGNE;

    fn table() -> DataFrame {
        df!(
            ANNEE => [Some(2022i64), Some(2023), Some(2023), None, Some(2024)],
            MODE => [Some("Métro"), Some("RER"), Some("Métro"), Some("Métro"), None],
            THEMATIQUE => ["Régularité", "Propreté", "Régularité", "Information", "Régularité"],
            LIGNE => ["1", "A", "4", "7", "T3a"]
        )
        .unwrap()
    }

    fn lignes(df: &DataFrame) -> Vec<String> {
        df.column(LIGNE)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_unrestricted_criteria_keep_everything() {
        let criteria = FilterCriteria::new()
            .years(Vec::new())
            .mode(Selection::All)
            .thematique(Selection::from_choice("Toutes"));

        assert!(criteria.is_unrestricted());
        assert_eq!(apply_filters(&table(), &criteria).height(), 5);
    }

    #[test]
    fn test_constraints_combine_with_and() {
        let criteria = FilterCriteria::new()
            .years([2023])
            .mode(Selection::from_choice("Métro"));

        assert_eq!(lignes(&apply_filters(&table(), &criteria)), vec!["4"]);
    }

    #[test]
    fn test_year_membership_excludes_missing_years() {
        let criteria = FilterCriteria::new().years([2022, 2024]);
        assert_eq!(lignes(&apply_filters(&table(), &criteria)), vec!["1", "T3a"]);
    }

    #[test]
    fn test_text_year_values_match_integer_column() {
        let criteria = FilterCriteria::new().with(ANNEE, Rule::AnyOf(vec!["2023".into()]));
        assert_eq!(lignes(&apply_filters(&table(), &criteria)), vec!["A", "4"]);
    }

    #[test]
    fn test_absent_field_is_a_no_op() {
        let criteria = FilterCriteria::new().with("indicateur", Rule::Equals(Selection::from_choice("Ponctualité")));
        assert_eq!(apply_filters(&table(), &criteria).height(), 5);
    }

    #[test]
    fn test_no_match_is_an_empty_table() {
        let criteria = FilterCriteria::new().thematique(Selection::from_choice("Accessibilité"));
        let filtered = apply_filters(&table(), &criteria);
        assert_eq!(filtered.height(), 0);
        assert_eq!(filtered.width(), 4);
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let criteria = FilterCriteria::new()
            .years([2022, 2023])
            .thematique(Selection::from_choice("Régularité"));

        let once = apply_filters(&table(), &criteria);
        let twice = apply_filters(&once, &criteria);
        assert!(once.equals_missing(&twice));
    }

    #[test]
    fn test_filter_options_are_sorted_and_distinct() {
        let options = FilterOptions::from_table(&table());
        assert_eq!(options.years, vec![2022, 2023, 2024]);
        assert_eq!(options.modes, vec!["Métro", "RER"]);
        assert_eq!(options.thematiques, vec!["Information", "Propreté", "Régularité"]);
    }

    #[test]
    fn test_cascading_options_narrow_with_upstream_selections() {
        let criteria = FilterCriteria::new()
            .years([2023])
            .mode(Selection::from_choice("RER"))
            .thematique(Selection::from_choice("Régularité"));
        let options = FilterOptions::cascading(&table(), &criteria);

        assert_eq!(options.years, vec![2022, 2023, 2024]);
        assert_eq!(options.modes, vec!["Métro", "RER"]);
        // the thematique selection does not narrow its own list
        assert_eq!(options.thematiques, vec!["Propreté"]);
    }

    #[test]
    fn test_cascading_options_without_selection_match_table() {
        let unrestricted = FilterCriteria::new()
            .years(Vec::new())
            .mode(Selection::All)
            .thematique(Selection::All);
        assert_eq!(
            FilterOptions::cascading(&table(), &unrestricted),
            FilterOptions::from_table(&table())
        );

        let only_2022 = FilterCriteria::new().years([2022]);
        let options = FilterOptions::cascading(&table(), &only_2022);
        assert_eq!(options.modes, vec!["Métro"]);
        assert_eq!(options.thematiques, vec!["Régularité"]);
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(Selection::from_choice("Tous"), Selection::All);
        assert_eq!(Selection::from_choice(" "), Selection::All);
        assert_eq!(
            Selection::from_choice("Bus"),
            Selection::Only(FilterValue::Text("Bus".to_string()))
        );
    }
}
