//! Entry points: a configurable [`Bisector`] and two one-shot helpers.

use crate::config::SearchConfig;
use crate::environment::{self, Diff, Environment, Snapshot};
use crate::error::BisectError;
use crate::oracle::{CancelToken, Oracle, Verdict};
use crate::repository::VersionRepository;
use crate::result::BisectionResult;
use crate::session::Session;
use crate::{reduce, sequence};
use log::info;
use std::collections::BTreeMap;

/// Runs searches against one oracle.
///
/// Each call to [`bisect`](Self::bisect) or [`bisect_diff`](Self::bisect_diff)
/// is an independent run with its own memo and log, seeded with any verdicts
/// given to [`with_known_verdicts`](Self::with_known_verdicts).
pub struct Bisector<'o, O: Oracle + ?Sized> {
    oracle: &'o O,
    config: SearchConfig,
    cancel: CancelToken,
    known: BTreeMap<Snapshot, Verdict>,
}

impl<'o, O: Oracle + ?Sized> Bisector<'o, O> {
    /// A bisector with the default configuration.
    pub fn new(oracle: &'o O) -> Self {
        Self {
            oracle,
            config: SearchConfig::default(),
            cancel: CancelToken::new(),
            known: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `cancel` to stop runs between probes.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Seed every run's memo, e.g. with the log of an interrupted run.
    /// Later entries win when a snapshot appears twice.
    pub fn with_known_verdicts<I>(mut self, verdicts: I) -> Self
    where
        I: IntoIterator<Item = (Snapshot, Verdict)>,
    {
        self.known.extend(verdicts);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Find the first failing snapshot of a monotonic sequence.
    pub fn bisect(&self, sequence: &[Snapshot]) -> Result<BisectionResult, BisectError> {
        if sequence.is_empty() {
            return Err(BisectError::EmptySequence);
        }
        let mut session = self.session();
        let step = sequence::run(&mut session, sequence);
        session.conclude(step)
    }

    /// Find the minimal set of component changes between `good` and `bad`
    /// that makes the check fail.
    ///
    /// Fails with [`BisectError::Enumeration`] before any oracle call if a
    /// changed component's versions cannot be enumerated.
    ///
    /// With a single changed component, `good` is only probed when
    /// `verify_boundary` is set; otherwise a failing `good` is not detected
    /// and the axis's first candidate is blamed.
    pub fn bisect_diff<R: VersionRepository + ?Sized>(
        &self,
        good: &Environment,
        bad: &Environment,
        repository: &R,
    ) -> Result<BisectionResult, BisectError> {
        let diff = environment::diff(good, bad, repository)?;
        info!(
            "{} of {} components changed",
            diff.len(),
            good.len().max(bad.len())
        );
        self.bisect_axes(good, &diff)
    }

    /// [`bisect_diff`](Self::bisect_diff) over an already computed diff.
    pub fn bisect_axes(
        &self,
        good: &Environment,
        diff: &Diff,
    ) -> Result<BisectionResult, BisectError> {
        let mut session = self.session();
        let step = reduce::run(&mut session, good, diff);
        session.conclude(step)
    }

    fn session(&self) -> Session<'_, O> {
        Session::new(self.oracle, &self.config, &self.cancel, &self.known)
    }
}

/// Bisect a snapshot sequence with the default configuration.
pub fn bisect<O: Oracle + ?Sized>(
    sequence: &[Snapshot],
    oracle: &O,
) -> Result<BisectionResult, BisectError> {
    Bisector::new(oracle).bisect(sequence)
}

/// Bisect the diff between two environments with the default configuration.
///
/// The default does not verify the boundary, so on a single-axis diff a
/// failing `good` goes unnoticed. See [`Bisector::bisect_diff`].
pub fn bisect_diff<O, R>(
    good: &Environment,
    bad: &Environment,
    repository: &R,
    oracle: &O,
) -> Result<BisectionResult, BisectError>
where
    O: Oracle + ?Sized,
    R: VersionRepository + ?Sized,
{
    Bisector::new(oracle).bisect_diff(good, bad, repository)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::OracleError;
    use crate::repository::EndpointsOnly;
    use crate::result::Outcome;
    use crate::version::Version;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        Environment::from_pairs(
            pairs
                .iter()
                .map(|(name, version)| (*name, Version::parse(version).unwrap())),
        )
    }

    #[test]
    fn test_dyn_oracle() {
        let closure = |s: &Snapshot| -> Result<Verdict, OracleError> {
            Ok(if s.get("b").map(|v| v.as_str()) == Some("2") {
                Verdict::Fail
            } else {
                Verdict::Pass
            })
        };
        let oracle: &dyn Oracle = &closure;
        let good = env(&[("a", "1"), ("b", "1")]);
        let bad = env(&[("a", "2"), ("b", "2")]);

        let result = Bisector::new(oracle)
            .bisect_diff(&good, &bad, &EndpointsOnly)
            .unwrap();
        assert!(result.is_conclusive());
    }

    #[test]
    fn test_runs_are_independent() {
        let oracle = |_: &Snapshot| -> Result<Verdict, OracleError> { Ok(Verdict::Fail) };
        let sequence = vec![env(&[("a", "1")]), env(&[("a", "2")])];
        let bisector = Bisector::new(&oracle);

        let first = bisector.bisect(&sequence).unwrap();
        let second = bisector.bisect(&sequence).unwrap();
        assert_eq!(first.outcome, second.outcome);
        assert_eq!(first.outcome, Outcome::FoundIndex { index: 0 });
        assert_eq!(second.oracle_calls, 1);
    }

    #[test]
    fn test_known_verdicts_are_not_recounted() {
        let oracle = |_: &Snapshot| -> Result<Verdict, OracleError> { Ok(Verdict::Fail) };
        let sequence = vec![env(&[("a", "1")]), env(&[("a", "2")])];
        let result = Bisector::new(&oracle)
            .with_known_verdicts([(sequence[0].clone(), Verdict::Fail)])
            .bisect(&sequence)
            .unwrap();
        assert_eq!(result.found_index(), Some(0));
        assert_eq!(result.oracle_calls, 0);
    }
}
