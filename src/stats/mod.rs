//! Stats module - dashboard views and headline figures

pub mod aggregator;
pub mod summary;

pub use aggregator::{
    AggregateError, Aggregator, AxisHint, CategoryBreakdown, GroupScore, RankedEntities,
    TemporalTrend, TrendPoint, TrendRow, TrendSeries, View, RANKED_ENTITY_LIMIT,
};
pub use summary::Summary;
