//! Search configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Knobs for one search run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Per-call timeout handed to the oracle.
    pub timeout: Option<Duration>,
    /// Worker-pool width for reduction-pass probes (0 is treated as 1).
    pub jobs: usize,
    /// Re-probe the reported boundary bypassing the memo.
    pub verify_boundary: bool,
    /// After reduction, bisect each culprit axis over its candidate versions.
    pub refine_versions: bool,
    /// Oracle-call budget; running out stops the search with partial results.
    pub max_probes: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            jobs: 1,
            verify_boundary: false,
            refine_versions: false,
            max_probes: None,
        }
    }
}

impl SearchConfig {
    /// Effective worker count.
    pub fn workers(&self) -> usize {
        self.jobs.max(1)
    }

    /// Whether reduction probes should go through the worker pool.
    pub fn is_parallel(&self) -> bool {
        self.workers() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sequential_and_unbounded() {
        let config = SearchConfig::default();
        assert_eq!(config.workers(), 1);
        assert!(!config.is_parallel());
        assert!(config.max_probes.is_none());
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_zero_jobs_means_one_worker() {
        let config = SearchConfig {
            jobs: 0,
            ..SearchConfig::default()
        };
        assert_eq!(config.workers(), 1);
    }
}
