//! Search results and the oracle-call log.

use crate::environment::Snapshot;
use crate::oracle::Verdict;
use crate::version::{display_pin, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which part of the search issued a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Binary search over an explicit snapshot sequence, or over the
    /// candidates of a single changed axis.
    Sequence,
    /// Binary search over cumulative one-event-per-axis snapshots.
    Localize,
    /// Revert-one-axis trials of delta debugging.
    Reduce,
    /// Binary search over the candidate versions of one culprit axis.
    Refine,
    /// Fresh re-probes confirming the reported boundary.
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Sequence => "sequence",
            Phase::Localize => "localize",
            Phase::Reduce => "reduce",
            Phase::Refine => "refine",
            Phase::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// One real oracle call, in the order it was issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// Position in the log (0-based).
    pub seq: usize,
    /// Search phase that issued the probe.
    pub phase: Phase,
    /// Axis being reverted or refined, if any.
    pub axis: Option<String>,
    /// Index into the searched sequence or candidate list, if any.
    pub index: Option<usize>,
    /// The probed snapshot.
    pub snapshot: Snapshot,
    /// The oracle's answer.
    pub verdict: Verdict,
    /// Wall-clock duration of the call.
    pub elapsed_ms: u64,
}

/// What kind of inconsistency a search ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The environment claimed to be good fails the check.
    GoodBaselineFails,
    /// Moving more axes toward bad turned a failure back into a pass.
    NonMonotonic,
    /// The same snapshot produced different verdicts.
    Inconsistent,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::GoodBaselineFails => "good baseline fails",
            ViolationKind::NonMonotonic => "non-monotonic failure",
            ViolationKind::Inconsistent => "inconsistent oracle",
        };
        f.write_str(name)
    }
}

/// An invariant the search relies on did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub detail: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Why a search stopped before reaching a conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The caller cancelled the search.
    Cancelled,
    /// The configured oracle-call budget ran out.
    ProbeBudgetExhausted,
    /// An oracle call errored; the run aborted with the verdicts so far.
    OracleFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::ProbeBudgetExhausted => f.write_str("probe budget exhausted"),
            StopReason::OracleFailed => f.write_str("oracle call failed"),
        }
    }
}

/// Culprit axes and the value each was found at (`None` = removed).
pub type Culprits = BTreeMap<String, Option<Version>>;

/// What the search concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The first failing snapshot of a sequence.
    FoundIndex { index: usize },
    /// The minimal set of axis changes that makes the check fail.
    FoundCulprits { culprits: Culprits },
    /// No failing snapshot in the searched range.
    NotFound,
    /// The inputs contradict the search's assumptions.
    InvariantViolation { violation: Violation },
    /// Stopped early; the log holds everything probed so far.
    Incomplete { reason: StopReason },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::FoundIndex { index } => write!(f, "first failing snapshot is #{}", index),
            Outcome::FoundCulprits { culprits } => {
                write!(f, "culprits: ")?;
                let mut first = true;
                for (component, pin) in culprits {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", component, display_pin(pin.as_ref()))?;
                    first = false;
                }
                Ok(())
            }
            Outcome::NotFound => f.write_str("no failing snapshot found"),
            Outcome::InvariantViolation { violation } => {
                write!(f, "invariant violation ({})", violation)
            }
            Outcome::Incomplete { reason } => write!(f, "incomplete ({})", reason),
        }
    }
}

/// The sole output of a search run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisectionResult {
    pub outcome: Outcome,
    /// Number of real oracle calls (memo hits excluded).
    pub oracle_calls: usize,
    /// Every real oracle call, in issue order.
    pub log: Vec<ProbeRecord>,
}

impl BisectionResult {
    /// Whether the outcome names a culprit (index or culprit set).
    pub fn is_conclusive(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::FoundIndex { .. } | Outcome::FoundCulprits { .. }
        )
    }

    /// The first failing index, for sequence searches.
    pub fn found_index(&self) -> Option<usize> {
        match self.outcome {
            Outcome::FoundIndex { index } => Some(index),
            _ => None,
        }
    }

    /// The culprit set, for diff searches.
    pub fn culprits(&self) -> Option<&Culprits> {
        match &self.outcome {
            Outcome::FoundCulprits { culprits } => Some(culprits),
            _ => None,
        }
    }

    /// Every recorded `(snapshot, verdict)` pair, for seeding a resumed run.
    pub fn verdicts(&self) -> impl Iterator<Item = (Snapshot, Verdict)> + '_ {
        self.log
            .iter()
            .map(|record| (record.snapshot.clone(), record.verdict))
    }
}
