//! Oracle seam: "materialize this snapshot, run the check, pass or fail".
//!
//! The oracle is the expensive part of every search: each call materializes
//! an environment from scratch and runs a command in it. The search treats it
//! as a black box with one contract: the verdict depends on the snapshot only.
//!
//! Not being able to run the check at all is an [`OracleError`], never a
//! [`Verdict::Fail`].

use crate::environment::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of one successful oracle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The check succeeded on this snapshot.
    Pass,
    /// The check failed on this snapshot.
    Fail,
}

impl Verdict {
    /// Whether this is [`Verdict::Fail`].
    pub fn is_fail(self) -> bool {
        self == Verdict::Fail
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// The check could not produce a verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleError {
    #[error("check timed out after {0:?}")]
    Timeout(Duration),

    #[error("environment could not be materialized: {0}")]
    Materialize(String),

    #[error("check could not be started: {0}")]
    Spawn(String),

    #[error("check was terminated: {0}")]
    Terminated(String),

    #[error("check failed to execute: {0}")]
    Other(String),
}

/// Pass/fail check over a snapshot.
///
/// Implementations must be free of hidden state across calls. `Sync` lets
/// reduction passes probe several snapshots at once.
pub trait Oracle: Send + Sync {
    /// Run the check against `snapshot`, giving up after `timeout` if set.
    fn check(&self, snapshot: &Snapshot, timeout: Option<Duration>)
        -> Result<Verdict, OracleError>;
}

impl<F> Oracle for F
where
    F: Fn(&Snapshot) -> Result<Verdict, OracleError> + Send + Sync,
{
    fn check(
        &self,
        snapshot: &Snapshot,
        _timeout: Option<Duration>,
    ) -> Result<Verdict, OracleError> {
        self(snapshot)
    }
}

/// Shared cancellation flag, checked by the search between probes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing flag (e.g. one flipped by a signal handler).
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { cancelled: flag }
    }

    /// Request cancellation. The probe in flight still completes.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
