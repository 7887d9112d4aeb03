//! Errors that abort a search.
//!
//! Running out of budget or being cancelled is not an error: those come back
//! as [`Outcome::Incomplete`](crate::result::Outcome::Incomplete). Everything
//! here means the search could not continue and the caller has to step in.

use crate::environment::{EnumerationError, EnvironmentError, Snapshot};
use crate::oracle::OracleError;
use crate::result::{BisectionResult, Outcome, Phase, ProbeRecord, StopReason};
use thiserror::Error;

/// Errors from a search run.
#[derive(Error, Debug)]
pub enum BisectError {
    #[error("cannot bisect an empty sequence")]
    EmptySequence,

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error("cannot build probe snapshot: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("cannot start worker pool: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Oracle(Box<ProbeFailure>),
}

impl BisectError {
    /// The probe log collected before the run aborted, if any.
    pub fn partial_log(&self) -> &[ProbeRecord] {
        match self {
            BisectError::Oracle(failure) => &failure.log,
            _ => &[],
        }
    }
}

/// An oracle call that produced no verdict, with everything needed to resume.
#[derive(Error, Debug, Clone)]
#[error(
    "{phase} probe{} failed on [{snapshot}] after {oracle_calls} oracle calls: {source}",
    axis_suffix(.axis)
)]
pub struct ProbeFailure {
    /// The snapshot that was being checked.
    pub snapshot: Snapshot,
    /// Search phase that issued the probe.
    pub phase: Phase,
    /// Axis under test, if any.
    pub axis: Option<String>,
    /// Oracle calls that produced a verdict before the run aborted.
    pub oracle_calls: usize,
    /// Log of those calls.
    pub log: Vec<ProbeRecord>,
    pub source: OracleError,
}

impl ProbeFailure {
    /// The verdicts collected before the failure, as an incomplete result
    /// that can be saved and resumed from.
    pub fn partial_result(&self) -> BisectionResult {
        BisectionResult {
            outcome: Outcome::Incomplete {
                reason: StopReason::OracleFailed,
            },
            oracle_calls: self.log.len(),
            log: self.log.clone(),
        }
    }
}

fn axis_suffix(axis: &Option<String>) -> String {
    match axis {
        Some(axis) => format!(" of axis {}", axis),
        None => String::new(),
    }
}

impl From<ProbeFailure> for BisectError {
    fn from(failure: ProbeFailure) -> Self {
        BisectError::Oracle(Box::new(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use crate::oracle::Verdict;
    use crate::version::Version;
    use std::time::Duration;

    #[test]
    fn test_probe_failure_message_and_source() {
        let failure = ProbeFailure {
            snapshot: Snapshot::from_pairs([("numpy", Version::parse("2.0").unwrap())]),
            phase: Phase::Reduce,
            axis: Some("numpy".to_string()),
            oracle_calls: 3,
            log: Vec::new(),
            source: OracleError::Timeout(Duration::from_secs(2)),
        };
        assert_eq!(
            failure.to_string(),
            "reduce probe of axis numpy failed on [numpy==2.0] after 3 oracle calls: \
             check timed out after 2s"
        );
        assert!(failure.source().is_some());

        let err = BisectError::from(failure);
        assert!(err.partial_log().is_empty());
        assert!(matches!(err, BisectError::Oracle(_)));
    }

    #[test]
    fn test_partial_result_is_resumable() {
        let snapshot = Snapshot::from_pairs([("numpy", Version::parse("1.26").unwrap())]);
        let record = ProbeRecord {
            seq: 0,
            phase: Phase::Sequence,
            axis: None,
            index: Some(3),
            snapshot: snapshot.clone(),
            verdict: Verdict::Pass,
            elapsed_ms: 40,
        };
        let failure = ProbeFailure {
            snapshot: Snapshot::new(),
            phase: Phase::Sequence,
            axis: None,
            oracle_calls: 1,
            log: vec![record],
            source: OracleError::Terminated("signal 9".to_string()),
        };

        let partial = failure.partial_result();
        assert_eq!(
            partial.outcome,
            Outcome::Incomplete {
                reason: StopReason::OracleFailed
            }
        );
        assert_eq!(partial.oracle_calls, 1);
        let verdicts: Vec<_> = partial.verdicts().collect();
        assert_eq!(verdicts, vec![(snapshot, Verdict::Pass)]);
    }

    #[test]
    fn test_empty_sequence_message() {
        assert_eq!(
            BisectError::EmptySequence.to_string(),
            "cannot bisect an empty sequence"
        );
    }
}
