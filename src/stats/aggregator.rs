//! View Aggregator Module
//! Grouped means behind the trend, worst-lines and category charts.

use crate::data::schema::{
    has_column, missing_columns, LIGNE, PERIODE_LABEL, SORT_KEY, THEMATIQUE, VALEUR_OBJECTIF,
    VALEUR_REELLE,
};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Maximum number of lines in the worst-performers view.
pub const RANKED_ENTITY_LIMIT: usize = 15;

/// Upper bound suggested for the category chart y-axis.
pub const CATEGORY_AXIS_UPPER: f64 = 105.0;

/// Margin below the lowest category mean for the y-axis lower bound.
pub const CATEGORY_AXIS_MARGIN: f64 = 5.0;

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("Polars error: {0}")]
    PolarsError(#[from] PolarsError),
}

/// A view result, or the canonical columns that made it unavailable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum View<T> {
    Available(T),
    Unavailable { missing: Vec<String> },
}

impl<T> View<T> {
    pub fn available(&self) -> Option<&T> {
        match self {
            View::Available(view) => Some(view),
            View::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, View::Available(_))
    }
}

/// Mean scores for one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub sort_key: i64,
    pub periode_label: String,
    pub reel: f64,
    pub objectif: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrendSeries {
    #[serde(rename = "Réel")]
    Reel,
    #[serde(rename = "Objectif")]
    Objectif,
}

impl TrendSeries {
    pub fn label(self) -> &'static str {
        match self {
            TrendSeries::Reel => "Réel",
            TrendSeries::Objectif => "Objectif",
        }
    }
}

/// One (period, series, score) row of the long-form trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRow {
    pub periode_label: String,
    pub sort_key: i64,
    pub series: TrendSeries,
    pub score: f64,
}

/// Periods in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemporalTrend {
    pub points: Vec<TrendPoint>,
}

impl TemporalTrend {
    /// Long form for charting: every `Réel` row, then every `Objectif` row.
    pub fn long_form(&self) -> Vec<TrendRow> {
        let reel = self.points.iter().map(|p| TrendRow {
            periode_label: p.periode_label.clone(),
            sort_key: p.sort_key,
            series: TrendSeries::Reel,
            score: p.reel,
        });
        let objectif = self.points.iter().filter_map(|p| {
            p.objectif.map(|score| TrendRow {
                periode_label: p.periode_label.clone(),
                sort_key: p.sort_key,
                series: TrendSeries::Objectif,
                score,
            })
        });
        reel.chain(objectif).collect()
    }
}

/// Mean measured value of one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupScore {
    pub key: String,
    pub mean: f64,
    pub count: usize,
}

/// Worst lines first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedEntities {
    pub rows: Vec<GroupScore>,
}

/// Suggested y-axis range for a bar chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisHint {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryBreakdown {
    pub rows: Vec<GroupScore>,
    pub axis: Option<AxisHint>,
}

/// Computes the dashboard views from a normalized (optionally filtered) table.
pub struct Aggregator;

impl Aggregator {
    /// Mean measured and target value per period, ascending by `sort_key`.
    pub fn temporal_trend(df: &DataFrame) -> Result<View<TemporalTrend>, AggregateError> {
        let missing = missing_columns(df, &[SORT_KEY, PERIODE_LABEL, VALEUR_REELLE]);
        if !missing.is_empty() {
            debug!(?missing, "Temporal trend unavailable");
            return Ok(View::Unavailable { missing });
        }

        let with_target = has_column(df, VALEUR_OBJECTIF);
        let mut aggs = vec![col(VALEUR_REELLE).mean()];
        if with_target {
            aggs.push(col(VALEUR_OBJECTIF).mean());
        }

        let grouped = df
            .clone()
            .lazy()
            .filter(
                col(SORT_KEY)
                    .is_not_null()
                    .and(col(PERIODE_LABEL).is_not_null())
                    .and(col(VALEUR_REELLE).is_not_null()),
            )
            .group_by([col(SORT_KEY), col(PERIODE_LABEL)])
            .agg(aggs)
            .sort([SORT_KEY, PERIODE_LABEL], SortMultipleOptions::default())
            .collect()?;

        let keys = grouped.column(SORT_KEY)?.cast(&DataType::Int64)?;
        let keys = keys.i64()?;
        let labels = grouped.column(PERIODE_LABEL)?.cast(&DataType::String)?;
        let labels = labels.str()?;
        let reel = grouped.column(VALEUR_REELLE)?.cast(&DataType::Float64)?;
        let reel = reel.f64()?;
        let objectif = if with_target {
            Some(grouped.column(VALEUR_OBJECTIF)?.cast(&DataType::Float64)?)
        } else {
            None
        };
        let objectif = objectif.as_ref().map(|c| c.f64()).transpose()?;

        let mut points = Vec::with_capacity(grouped.height());
        for i in 0..grouped.height() {
            if let (Some(sort_key), Some(label), Some(mean)) = (keys.get(i), labels.get(i), reel.get(i)) {
                points.push(TrendPoint {
                    sort_key,
                    periode_label: label.to_string(),
                    reel: mean,
                    objectif: objectif.and_then(|ca| ca.get(i)),
                });
            }
        }

        Ok(View::Available(TemporalTrend { points }))
    }

    /// Lowest mean measured values per line, at most [`RANKED_ENTITY_LIMIT`].
    pub fn ranked_entities(df: &DataFrame) -> Result<View<RankedEntities>, AggregateError> {
        Ok(match Self::mean_by(df, LIGNE, Some(RANKED_ENTITY_LIMIT))? {
            View::Available(rows) => View::Available(RankedEntities { rows }),
            View::Unavailable { missing } => View::Unavailable { missing },
        })
    }

    /// Mean measured value per thematique, ascending, with an axis hint.
    pub fn category_breakdown(df: &DataFrame) -> Result<View<CategoryBreakdown>, AggregateError> {
        Ok(match Self::mean_by(df, THEMATIQUE, None)? {
            View::Available(rows) => {
                let axis = Self::axis_hint(&rows);
                View::Available(CategoryBreakdown { rows, axis })
            }
            View::Unavailable { missing } => View::Unavailable { missing },
        })
    }

    /// `[max(0, min - 5), 105]`, or `None` when there are no rows.
    pub fn axis_hint(rows: &[GroupScore]) -> Option<AxisHint> {
        rows.iter()
            .map(|r| r.mean)
            .reduce(f64::min)
            .map(|min| AxisHint {
                lower: (min - CATEGORY_AXIS_MARGIN).max(0.0),
                upper: CATEGORY_AXIS_UPPER,
            })
    }

    /// Mean `valeur_reelle` per non-null `key`, ascending by mean then key.
    fn mean_by(
        df: &DataFrame,
        key: &str,
        limit: Option<usize>,
    ) -> Result<View<Vec<GroupScore>>, AggregateError> {
        let missing = missing_columns(df, &[key, VALEUR_REELLE]);
        if !missing.is_empty() {
            debug!(key, ?missing, "Grouped view unavailable");
            return Ok(View::Unavailable { missing });
        }

        let mut lazy = df
            .clone()
            .lazy()
            .filter(col(key).is_not_null().and(col(VALEUR_REELLE).is_not_null()))
            .group_by([col(key).cast(DataType::String)])
            .agg([
                col(VALEUR_REELLE).mean(),
                col(VALEUR_REELLE).count().alias("count"),
            ])
            .sort([VALEUR_REELLE, key], SortMultipleOptions::default());
        if let Some(limit) = limit {
            lazy = lazy.limit(limit as IdxSize);
        }
        let grouped = lazy.collect()?;

        let keys = grouped.column(key)?.str()?;
        let means = grouped.column(VALEUR_REELLE)?.cast(&DataType::Float64)?;
        let means = means.f64()?;
        let counts = grouped.column("count")?.cast(&DataType::UInt64)?;
        let counts = counts.u64()?;

        let rows = (0..grouped.height())
            .filter_map(|i| {
                Some(GroupScore {
                    key: keys.get(i)?.to_string(),
                    mean: means.get(i)?,
                    count: counts.get(i).unwrap_or(0) as usize,
                })
            })
            .collect();

        Ok(View::Available(rows))
    }
}
