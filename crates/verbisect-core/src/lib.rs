//! Bisection engine for versioned component environments.
//!
//! Given an environment that passes a check and one that fails it, find the
//! component changes responsible while spending as few checks as possible.
//! Each check (an [`Oracle`] call) is assumed to be expensive: it materializes
//! an environment and runs a command in it.
//!
//! # Searches
//!
//! - [`bisect`] finds the first failing snapshot of a monotonic sequence with
//!   at most `ceil(log2(n))` oracle calls when some snapshot fails.
//! - [`bisect_diff`] diffs two environments into axes (one per changed
//!   component) and finds a 1-minimal culprit set:
//!
//! ```text
//! k = 1   binary search over the axis's candidate versions
//! k > 1   localize: bisect cumulative snapshots (axes 0..=i at bad)
//!         reduce:   revert axes one at a time, keep reverts that still fail,
//!                   repeat passes until nothing changes
//!         refine:   (optional) bisect each culprit over its candidates
//! ```
//!
//! # Example Usage
//!
//! ```
//! use verbisect_core::{bisect_diff, EndpointsOnly, Environment, OracleError, Snapshot, Verdict};
//!
//! let good: Environment = "numpy==1.26\npandas==2.0".parse().unwrap();
//! let bad: Environment = "numpy==2.0\npandas==2.1".parse().unwrap();
//!
//! let oracle = |s: &Snapshot| -> Result<Verdict, OracleError> {
//!     let broken = s.get("numpy").map(|v| v.as_str()) == Some("2.0");
//!     Ok(if broken { Verdict::Fail } else { Verdict::Pass })
//! };
//!
//! let result = bisect_diff(&good, &bad, &EndpointsOnly, &oracle).unwrap();
//! assert_eq!(result.culprits().unwrap().len(), 1);
//! ```
//!
//! # Module Structure
//!
//! - [`version`]: version strings and their ordering
//! - [`environment`]: environments, snapshots and the diff model
//! - [`repository`]: which versions of a component exist
//! - [`oracle`]: the pass/fail check seam and cancellation
//! - [`config`]: search knobs
//! - [`result`]: outcomes and the probe log
//! - [`error`]: errors that abort a search
//!
//! # Determinism
//!
//! Axis order is component-name order, midpoints are floored, and batches of
//! concurrent probes are recorded in request order, so the same inputs and
//! oracle give the same result.

pub mod bisector;
pub mod config;
pub mod environment;
pub mod error;
pub mod oracle;
mod reduce;
pub mod repository;
pub mod result;
mod sequence;
mod session;
pub mod version;

// Re-export main types for convenience
pub use bisector::{bisect, bisect_diff, Bisector};
pub use config::SearchConfig;
pub use environment::{
    diff, Diff, DiffEntry, EnumerationError, EnumerationFailure, Environment, EnvironmentError,
    Snapshot,
};
pub use error::{BisectError, ProbeFailure};
pub use oracle::{CancelToken, Oracle, OracleError, Verdict};
pub use repository::{EndpointsOnly, RepositoryError, StaticRepository, VersionRepository};
pub use result::{
    BisectionResult, Culprits, Outcome, Phase, ProbeRecord, StopReason, Violation, ViolationKind,
};
pub use version::{Version, VersionError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _ = SearchConfig::default();
        let _ = StaticRepository::new();
        let _ = CancelToken::new();
        let _ = Environment::new();
        let _ = Version::parse("1.0").unwrap();
        assert!(Diff::default().is_empty());
    }
}
