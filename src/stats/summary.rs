//! Headline KPIs: overall mean measured value, mean target and the gap.

use crate::data::schema::{VALEUR_OBJECTIF, VALEUR_REELLE};
use polars::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub rows: usize,
    pub mean_reel: Option<f64>,
    pub mean_objectif: Option<f64>,
    /// `mean_reel - mean_objectif`, in points.
    pub delta: Option<f64>,
}

impl Summary {
    pub fn from_table(df: &DataFrame) -> Self {
        let mean_reel = column_mean(df, VALEUR_REELLE);
        let mean_objectif = column_mean(df, VALEUR_OBJECTIF);
        let delta = match (mean_reel, mean_objectif) {
            (Some(reel), Some(objectif)) => Some(reel - objectif),
            _ => None,
        };

        Self {
            rows: df.height(),
            mean_reel,
            mean_objectif,
            delta,
        }
    }
}

/// Mean of the non-null values of a numeric column.
fn column_mean(df: &DataFrame, name: &str) -> Option<f64> {
    let column = df.column(name).ok()?.cast(&DataType::Float64).ok()?;
    let values: Vec<f64> = column.f64().ok()?.into_iter().flatten().collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}
