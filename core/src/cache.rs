//! Integrity state of the on-disk index snapshot.
//!
//! The status is computed once, when a handle is opened, and is never watched.
//! The only way to reach `Built` is a full build followed by a save.

use crate::config::CachePaths;
use crate::error::{Result, SearchError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// The cache directory does not exist.
    NotBuilt,
    /// The directory exists but one or more artifacts are missing.
    Corrupt,
    Built,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::NotBuilt => f.write_str("not built"),
            CacheStatus::Corrupt => f.write_str("corrupt"),
            CacheStatus::Built => f.write_str("built"),
        }
    }
}

impl CacheStatus {
    /// What the user has to do to get out of this state.
    pub fn remedy(&self) -> &'static str {
        match self {
            CacheStatus::NotBuilt => "Index not built. Please build the index first using the build command.",
            CacheStatus::Corrupt => "Cache corrupted! Please rebuild the cache to proceed.",
            CacheStatus::Built => "Cache is ready.",
        }
    }
}

/// Snapshot of the cache directory taken at construction time.
#[derive(Debug, Clone)]
pub struct CacheManager {
    paths: CachePaths,
    status: CacheStatus,
    missing: Vec<PathBuf>,
}

impl CacheManager {
    pub fn open(paths: CachePaths) -> Self {
        let (status, missing) = inspect(&paths);
        match status {
            CacheStatus::Corrupt => tracing::warn!(root = %paths.root.display(), missing = ?missing, "cache is corrupt"),
            _ => tracing::debug!(root = %paths.root.display(), %status, "checked cache integrity"),
        }
        Self { paths, status, missing }
    }

    pub fn status(&self) -> CacheStatus { self.status }

    pub fn paths(&self) -> &CachePaths { &self.paths }

    /// Artifacts found missing when the cache was inspected.
    pub fn missing_files(&self) -> &[PathBuf] { &self.missing }

    pub fn is_broken(&self) -> bool { self.status != CacheStatus::Built }

    /// Gate for query-serving entry points.
    pub fn ensure_built(&self) -> Result<()> {
        match self.status {
            CacheStatus::Built => Ok(()),
            other => Err(SearchError::CacheBlocked(other)),
        }
    }

    /// Record a successful full save.
    pub(crate) fn mark_built(&mut self) {
        self.status = CacheStatus::Built;
        self.missing.clear();
    }
}

pub fn check_cache_integrity(paths: &CachePaths) -> CacheStatus { inspect(paths).0 }

fn inspect(paths: &CachePaths) -> (CacheStatus, Vec<PathBuf>) {
    if !paths.root.is_dir() {
        return (CacheStatus::NotBuilt, Vec::new());
    }
    let missing: Vec<PathBuf> = paths.expected_index_files().into_iter().filter(|p| !p.exists()).collect();
    if missing.is_empty() { (CacheStatus::Built, missing) } else { (CacheStatus::Corrupt, missing) }
}
