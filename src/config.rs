//! Search scheduling configuration.
//!
//! `SearchConfig` is intentionally small and serde-friendly so it can be
//! embedded in higher-level service configs and tuned per fingerprint kind
//! without touching the index code.

use serde::{Deserialize, Serialize};

use crate::error::DetectorError;

/// Tuning knobs for one bounded-radius search call.
///
/// The subtree cutoff decides where a search switches from a plain
/// recursive walk to fanning eligible children out onto a worker pool.
/// Spawning has fixed overhead that only pays off once a subtree is large
/// enough to hold non-trivial independent sub-searches; small subtrees are
/// cheaper walked directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchConfig {
    /// Smallest subtree that is dispatched onto the worker pool. Subtrees
    /// below this size are searched sequentially.
    #[serde(default = "SearchConfig::default_parallel_min_subtree")]
    pub parallel_min_subtree: usize,
    /// Width of the per-search worker pool. `1` forces a fully sequential
    /// search regardless of subtree sizes.
    #[serde(default = "SearchConfig::default_max_workers")]
    pub max_workers: usize,
}

impl SearchConfig {
    pub(crate) fn default_parallel_min_subtree() -> usize {
        50
    }

    pub(crate) fn default_max_workers() -> usize {
        4
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subtree size at which child traversal is parallelized.
    /// Use `usize::MAX` to pin a lane to sequential search.
    pub fn with_parallel_min_subtree(mut self, len: usize) -> Self {
        self.parallel_min_subtree = len;
        self
    }

    /// Set the worker pool width used above the subtree cutoff.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.parallel_min_subtree == 0 {
            return Err(DetectorError::InvalidConfig(
                "parallel_min_subtree must be greater than zero".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(DetectorError::InvalidConfig(
                "max_workers must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            parallel_min_subtree: Self::default_parallel_min_subtree(),
            max_workers: Self::default_max_workers(),
        }
    }
}
