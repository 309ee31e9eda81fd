//! Persisted split assignments.

use data_contracts::SplitAssignment;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::types::DatasetResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(SplitAssignment),
    /// No split file yet; compute one now.
    Miss,
}

#[derive(Debug, Clone)]
pub struct SplitCache {
    path: PathBuf,
}

impl SplitCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<splits_root>/<dataset>_splits.json`
    pub fn for_dataset(splits_root: &Path, dataset: &str) -> Self {
        Self::new(splits_root.join(format!("{dataset}_splits.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A present but unreadable or malformed file is an error, not a miss.
    pub fn lookup(&self) -> DatasetResult<CacheLookup> {
        if !self.path.exists() {
            return Ok(CacheLookup::Miss);
        }
        Ok(CacheLookup::Hit(SplitAssignment::load(&self.path)?))
    }

    pub fn store(&self, splits: &SplitAssignment) -> DatasetResult<()> {
        splits.save(&self.path)?;
        info!("Saved splits to {}", self.path.display());
        Ok(())
    }

    /// Returns the cached assignment unless `force` is set; otherwise computes
    /// and stores a fresh one. The flag tells whether the cache was used.
    pub fn resolve<F>(&self, force: bool, compute: F) -> DatasetResult<(SplitAssignment, bool)>
    where
        F: FnOnce() -> DatasetResult<SplitAssignment>,
    {
        if !force {
            if let CacheLookup::Hit(splits) = self.lookup()? {
                info!("Loaded splits from {}", self.path.display());
                return Ok((splits, true));
            }
        }
        let splits = compute()?;
        self.store(&splits)?;
        Ok((splits, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_contracts::NativeClassId;

    fn sample() -> SplitAssignment {
        SplitAssignment::new(
            vec![NativeClassId::from("a")],
            vec![NativeClassId::from("b")],
            vec![NativeClassId::from("c")],
        )
    }

    #[test]
    fn missing_file_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SplitCache::for_dataset(dir.path(), "toy");
        assert_eq!(cache.lookup().unwrap(), CacheLookup::Miss);
    }

    #[test]
    fn empty_but_valid_cache_is_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SplitCache::for_dataset(dir.path(), "empty");
        cache.store(&SplitAssignment::default()).unwrap();
        assert_eq!(
            cache.lookup().unwrap(),
            CacheLookup::Hit(SplitAssignment::default())
        );
    }

    #[test]
    fn resolve_prefers_cache_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SplitCache::for_dataset(dir.path(), "toy");
        let (first, cached) = cache.resolve(false, || Ok(sample())).unwrap();
        assert!(!cached);
        assert_eq!(first, sample());

        let (second, cached) = cache
            .resolve(false, || Ok(SplitAssignment::default()))
            .unwrap();
        assert!(cached);
        assert_eq!(second, sample());

        let (third, cached) = cache
            .resolve(true, || Ok(SplitAssignment::default()))
            .unwrap();
        assert!(!cached);
        assert!(third.is_empty());
        assert_eq!(cache.lookup().unwrap(), CacheLookup::Hit(third));
    }

    #[test]
    fn corrupt_cache_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SplitCache::for_dataset(dir.path(), "toy");
        std::fs::write(cache.path(), b"[1, 2").unwrap();
        assert!(cache.lookup().is_err());
    }
}
