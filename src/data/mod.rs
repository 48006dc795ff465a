//! Data module - CSV loading, normalization and filtering

pub mod cache;
pub mod filter;
pub mod loader;
pub mod normalizer;
pub mod schema;

pub use cache::TableCache;
pub use filter::{apply_filters, FilterCriteria, FilterOptions, FilterValue, Rule, Selection};
pub use loader::{load, DataLoader, LoadError, LoadOptions, SourceEncoding};
pub use normalizer::{normalize, NormalizeError, Normalizer};
