//! Table Cache Module
//! Memoizes prepared tables per source path until the file changes.

use crate::data::loader::{fingerprint, LoadError, SourceFingerprint};
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

struct CacheEntry {
    fingerprint: SourceFingerprint,
    table: Arc<DataFrame>,
}

/// Prepared tables keyed by source path and file fingerprint.
#[derive(Default)]
pub struct TableCache {
    entries: HashMap<PathBuf, CacheEntry>,
    builds: usize,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached table for `path`, building it with `build` when the
    /// path is new or its fingerprint changed since the last build.
    pub fn get_or_build<E, F>(&mut self, path: &Path, build: F) -> Result<Arc<DataFrame>, E>
    where
        E: From<LoadError>,
        F: FnOnce(&Path) -> Result<DataFrame, E>,
    {
        let current = match fingerprint(path) {
            Ok(current) => current,
            Err(e) => {
                self.invalidate(path);
                return Err(e.into());
            }
        };

        if let Some(entry) = self.entries.get(path) {
            if entry.fingerprint == current {
                debug!(path = %path.display(), "Cache hit");
                return Ok(Arc::clone(&entry.table));
            }
            info!(path = %path.display(), "Source changed, rebuilding");
        }

        let table = Arc::new(build(path)?);
        self.builds += 1;
        self.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                fingerprint: current,
                table: Arc::clone(&table),
            },
        );
        Ok(table)
    }

    /// Drop the entry for `path`; returns whether one existed.
    pub fn invalidate(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of times a table was (re)built.
    pub fn builds(&self) -> usize {
        self.builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn one_column(n: usize) -> Result<DataFrame, LoadError> {
        Ok(df!("x" => vec![1i64; n]).unwrap())
    }

    #[test]
    fn test_unchanged_source_is_built_once() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x").unwrap();
        let mut cache = TableCache::new();

        let first = cache.get_or_build(file.path(), |_| one_column(2)).unwrap();
        let second = cache.get_or_build(file.path(), |_| one_column(3)).unwrap();

        assert_eq!(cache.builds(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.height(), 2);
    }

    #[test]
    fn test_changed_source_is_rebuilt() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x").unwrap();
        let mut cache = TableCache::new();
        cache.get_or_build(file.path(), |_| one_column(2)).unwrap();

        // Length changes even when the mtime resolution is coarse.
        writeln!(file, "1").unwrap();
        file.flush().unwrap();
        let rebuilt = cache.get_or_build(file.path(), |_| one_column(3)).unwrap();

        assert_eq!(cache.builds(), 2);
        assert_eq!(rebuilt.height(), 3);
    }

    #[test]
    fn test_explicit_invalidation() {
        let file = NamedTempFile::new().unwrap();
        let mut cache = TableCache::new();
        cache.get_or_build(file.path(), |_| one_column(1)).unwrap();

        assert!(cache.invalidate(file.path()));
        assert!(cache.is_empty());
        cache.get_or_build(file.path(), |_| one_column(1)).unwrap();
        assert_eq!(cache.builds(), 2);
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let mut cache = TableCache::new();
        let result = cache.get_or_build(Path::new("/no/such/source.csv"), |_| one_column(1));
        assert!(matches!(result, Err(LoadError::NotFound(_))));
        assert_eq!(cache.builds(), 0);
    }
}
