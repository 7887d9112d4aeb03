//! Probe session: every oracle call of one run goes through here.
//!
//! The session owns the memo (snapshot → verdict), the ordered probe log and
//! the worker pool. It is also where cancellation and the probe budget are
//! enforced, always between probes and never during one.

use crate::config::SearchConfig;
use crate::environment::{EnvironmentError, Snapshot};
use crate::error::{BisectError, ProbeFailure};
use crate::oracle::{CancelToken, Oracle, OracleError, Verdict};
use crate::result::{BisectionResult, Outcome, Phase, ProbeRecord, StopReason, Violation};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Labels a probe for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProbeTag {
    pub phase: Phase,
    pub axis: Option<String>,
    pub index: Option<usize>,
}

impl ProbeTag {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            axis: None,
            index: None,
        }
    }

    pub fn axis(mut self, component: &str) -> Self {
        self.axis = Some(component.to_string());
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

/// Why a search step did not produce a value.
#[derive(Debug)]
pub(crate) enum Halt {
    /// Stop early and report what was collected.
    Stopped(StopReason),
    /// The inputs contradict the search's assumptions.
    Violated(Violation),
    /// Abort the run.
    Failed(BisectError),
}

impl From<BisectError> for Halt {
    fn from(err: BisectError) -> Self {
        Halt::Failed(err)
    }
}

impl From<EnvironmentError> for Halt {
    fn from(err: EnvironmentError) -> Self {
        Halt::Failed(err.into())
    }
}

pub(crate) struct Session<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    config: &'a SearchConfig,
    cancel: &'a CancelToken,
    memo: BTreeMap<Snapshot, Verdict>,
    log: Vec<ProbeRecord>,
    pool: Option<rayon::ThreadPool>,
}

impl<'a, O: Oracle + ?Sized> Session<'a, O> {
    /// Start a session whose memo is seeded with `known` verdicts.
    pub fn new(
        oracle: &'a O,
        config: &'a SearchConfig,
        cancel: &'a CancelToken,
        known: &BTreeMap<Snapshot, Verdict>,
    ) -> Self {
        if !known.is_empty() {
            info!("Resuming with {} known verdicts", known.len());
        }
        Self {
            oracle,
            config,
            cancel,
            memo: known.clone(),
            log: Vec::new(),
            pool: None,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        self.config
    }

    /// Real oracle calls so far.
    pub fn calls(&self) -> usize {
        self.log.len()
    }

    /// Verdict for `snapshot`, from the memo or from the oracle.
    pub fn probe(&mut self, snapshot: &Snapshot, tag: ProbeTag) -> Result<Verdict, Halt> {
        if let Some(&verdict) = self.memo.get(snapshot) {
            debug!("memo hit [{}]: {} -> {}", tag.phase, snapshot, verdict);
            return Ok(verdict);
        }
        let verdict = self.call(snapshot, tag)?;
        self.memo.insert(snapshot.clone(), verdict);
        Ok(verdict)
    }

    /// Ask the oracle again even if the memo knows the answer. The memo keeps
    /// its original verdict.
    pub fn probe_fresh(&mut self, snapshot: &Snapshot, tag: ProbeTag) -> Result<Verdict, Halt> {
        self.call(snapshot, tag)
    }

    /// Verdicts for every request, in request order.
    ///
    /// Snapshots the memo does not know are checked concurrently on the
    /// worker pool; their records are appended in request order. The whole
    /// batch must fit in the remaining probe budget. If any check errors,
    /// every verdict the batch did produce is still logged and memoized
    /// before the first error is returned.
    pub fn probe_batch(
        &mut self,
        requests: Vec<(Snapshot, ProbeTag)>,
    ) -> Result<Vec<Verdict>, Halt> {
        let mut seen = BTreeSet::new();
        let pending: Vec<&Snapshot> = requests
            .iter()
            .map(|(snapshot, _)| snapshot)
            .filter(|snapshot| !self.memo.contains_key(*snapshot) && seen.insert(*snapshot))
            .collect();

        let mut answers: BTreeMap<Snapshot, (Result<Verdict, OracleError>, Duration)> =
            if pending.len() > 1 {
                self.admit(pending.len())?;
                let pool = match self.pool.take() {
                    Some(pool) => pool,
                    None => self.build_pool()?,
                };
                let oracle = self.oracle;
                let timeout = self.config.timeout;
                debug!(
                    "probing {} snapshots on {} workers",
                    pending.len(),
                    pool.current_num_threads()
                );
                let results: Vec<(Result<Verdict, OracleError>, Duration)> = pool.install(|| {
                    pending
                        .par_iter()
                        .map(|snapshot| {
                            let started = Instant::now();
                            let result = oracle.check(snapshot, timeout);
                            (result, started.elapsed())
                        })
                        .collect()
                });
                self.pool = Some(pool);
                pending.into_iter().cloned().zip(results).collect()
            } else {
                BTreeMap::new()
            };

        let mut verdicts = Vec::with_capacity(requests.len());
        let mut failed: Option<(Snapshot, ProbeTag, OracleError)> = None;
        for (snapshot, tag) in requests {
            if let Some(&verdict) = self.memo.get(&snapshot) {
                verdicts.push(verdict);
                continue;
            }
            match answers.remove(&snapshot) {
                Some((Ok(verdict), elapsed)) => {
                    self.push(&snapshot, tag, verdict, elapsed);
                    self.memo.insert(snapshot, verdict);
                    verdicts.push(verdict);
                }
                Some((Err(source), _)) => {
                    if failed.is_some() {
                        warn!(
                            "Oracle error during {} probe of {}: {}",
                            tag.phase, snapshot, source
                        );
                    } else {
                        failed = Some((snapshot, tag, source));
                    }
                }
                // a duplicate of a snapshot whose check errored
                None if failed.is_some() => {}
                None => verdicts.push(self.probe(&snapshot, tag)?),
            }
        }

        match failed {
            Some((snapshot, tag, source)) => Err(self.failure(&snapshot, tag, source)),
            None => Ok(verdicts),
        }
    }

    /// Wrap up a run that produced an outcome.
    pub fn finish(self, outcome: Outcome) -> BisectionResult {
        match &outcome {
            Outcome::InvariantViolation { violation } => warn!("Invariant violation: {}", violation),
            other => info!("Search finished: {}", other),
        }
        info!("{} oracle calls", self.log.len());
        BisectionResult {
            outcome,
            oracle_calls: self.log.len(),
            log: self.log,
        }
    }

    /// Turn a search step's result into the run's result.
    pub fn conclude(self, step: Result<Outcome, Halt>) -> Result<BisectionResult, BisectError> {
        match step {
            Ok(outcome) => Ok(self.finish(outcome)),
            Err(Halt::Stopped(reason)) => Ok(self.finish(Outcome::Incomplete { reason })),
            Err(Halt::Violated(violation)) => {
                Ok(self.finish(Outcome::InvariantViolation { violation }))
            }
            Err(Halt::Failed(err)) => Err(err),
        }
    }

    fn admit(&self, count: usize) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            info!("Cancelled after {} oracle calls", self.log.len());
            return Err(Halt::Stopped(StopReason::Cancelled));
        }
        if let Some(max) = self.config.max_probes {
            if self.log.len() + count > max {
                info!(
                    "Probe budget of {} exhausted ({} more needed)",
                    max,
                    self.log.len() + count - max
                );
                return Err(Halt::Stopped(StopReason::ProbeBudgetExhausted));
            }
        }
        Ok(())
    }

    fn call(&mut self, snapshot: &Snapshot, tag: ProbeTag) -> Result<Verdict, Halt> {
        self.admit(1)?;
        let started = Instant::now();
        let result = self.oracle.check(snapshot, self.config.timeout);
        self.record(snapshot, tag, result, started.elapsed())
    }

    fn record(
        &mut self,
        snapshot: &Snapshot,
        tag: ProbeTag,
        result: Result<Verdict, OracleError>,
        elapsed: Duration,
    ) -> Result<Verdict, Halt> {
        match result {
            Ok(verdict) => {
                self.push(snapshot, tag, verdict, elapsed);
                Ok(verdict)
            }
            Err(source) => Err(self.failure(snapshot, tag, source)),
        }
    }

    fn push(&mut self, snapshot: &Snapshot, tag: ProbeTag, verdict: Verdict, elapsed: Duration) {
        let seq = self.log.len();
        debug!(
            "probe #{} [{}{}]: {} -> {} ({:?})",
            seq,
            tag.phase,
            tag.axis
                .as_deref()
                .map(|axis| format!(" {}", axis))
                .unwrap_or_default(),
            snapshot,
            verdict,
            elapsed
        );
        self.log.push(ProbeRecord {
            seq,
            phase: tag.phase,
            axis: tag.axis,
            index: tag.index,
            snapshot: snapshot.clone(),
            verdict,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    fn failure(&self, snapshot: &Snapshot, tag: ProbeTag, source: OracleError) -> Halt {
        warn!(
            "Oracle error during {} probe of {}: {}",
            tag.phase, snapshot, source
        );
        let failure = ProbeFailure {
            snapshot: snapshot.clone(),
            phase: tag.phase,
            axis: tag.axis,
            oracle_calls: self.log.len(),
            log: self.log.clone(),
            source,
        };
        Halt::Failed(failure.into())
    }

    fn build_pool(&self) -> Result<rayon::ThreadPool, Halt> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers())
            .thread_name(|i| format!("verbisect-probe-{}", i))
            .build()
            .map_err(|e| Halt::Failed(BisectError::WorkerPool(e.to_string())))
    }
}
