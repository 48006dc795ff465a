//! Dashboard pipeline: load → normalize → filter → aggregate.

use crate::data::{
    apply_filters, DataLoader, FilterCriteria, FilterOptions, LoadError, LoadOptions,
    NormalizeError, Normalizer, TableCache,
};
use crate::stats::{
    AggregateError, Aggregator, CategoryBreakdown, RankedEntities, Summary, TemporalTrend, View,
};
use polars::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("{} was loaded but holds no usable rows after cleaning", .0.display())]
    EmptyAfterCleaning(PathBuf),
}

impl PipelineError {
    /// Whether this should be reported as a warning rather than a failure.
    pub fn is_warning(&self) -> bool {
        matches!(self, PipelineError::EmptyAfterCleaning(_))
    }
}

/// Loads and normalizes sources, reusing the result until the file changes.
pub struct DataSource {
    loader: DataLoader,
    cache: TableCache,
}

impl DataSource {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            loader: DataLoader::new(options),
            cache: TableCache::new(),
        }
    }

    /// Normalized table for `path`.
    pub fn prepare(&mut self, path: &Path) -> Result<Arc<DataFrame>, PipelineError> {
        let loader = &self.loader;
        let table = self.cache.get_or_build(path, |path| -> Result<DataFrame, PipelineError> {
            let raw = loader.load_csv(path)?;
            Ok(Normalizer::normalize(&raw)?)
        })?;

        if table.height() == 0 {
            return Err(PipelineError::EmptyAfterCleaning(path.to_path_buf()));
        }
        Ok(table)
    }

    pub fn invalidate(&mut self, path: &Path) -> bool {
        self.cache.invalidate(path)
    }

    /// Number of load + normalize runs so far.
    pub fn builds(&self) -> usize {
        self.cache.builds()
    }
}

/// Everything the presentation layer renders for one set of filters.
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub criteria: FilterCriteria,
    pub options: FilterOptions,
    pub summary: Summary,
    pub trend: View<TemporalTrend>,
    pub worst_lines: View<RankedEntities>,
    pub categories: View<CategoryBreakdown>,
    /// Filtered normalized rows, for raw display.
    #[serde(skip)]
    pub rows: DataFrame,
}

impl Dashboard {
    /// Filter `table` and compute every view. Each option list narrows with
    /// the selections above it (years, then mode, then thematique).
    pub fn build(table: &DataFrame, criteria: &FilterCriteria) -> Result<Self, AggregateError> {
        let options = FilterOptions::cascading(table, criteria);
        let rows = apply_filters(table, criteria);

        let dashboard = Self {
            criteria: criteria.clone(),
            options,
            summary: Summary::from_table(&rows),
            trend: Aggregator::temporal_trend(&rows)?,
            worst_lines: Aggregator::ranked_entities(&rows)?,
            categories: Aggregator::category_breakdown(&rows)?,
            rows,
        };

        info!(
            rows = dashboard.summary.rows,
            trend = dashboard.trend.is_available(),
            worst_lines = dashboard.worst_lines.is_available(),
            categories = dashboard.categories.is_available(),
            "Dashboard built"
        );
        Ok(dashboard)
    }
}
