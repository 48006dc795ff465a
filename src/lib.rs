//! Transit Quality - service-quality indicator ingestion & dashboard views
//!
//! Loads the IDFM/RATP "qualité de service" CSV export, normalizes it into a
//! canonical table and derives the trend, worst-lines and category views.

pub mod dashboard;
pub mod data;
pub mod report;
pub mod stats;

pub use dashboard::{Dashboard, DataSource, PipelineError};
