//! Binary search for the first failing snapshot of a monotonic sequence.
//!
//! `lo`/`hi` start at the ends of the sequence. Each round probes the floor
//! midpoint: Fail moves `hi` down to it, Pass moves `lo` past it. When they
//! meet, `lo` is the first failing index, unless no probe ever failed; then
//! the last index is checked once and a Pass there means nothing fails.
//!
//! The same search drives single-axis diffs, localization over cumulative
//! snapshots and culprit refinement, with different snapshot builders.

use crate::environment::Snapshot;
use crate::error::BisectError;
use crate::oracle::{Oracle, Verdict};
use crate::result::{Outcome, Phase, Violation, ViolationKind};
use crate::session::{Halt, ProbeTag, Session};
use log::{debug, info};

/// First index in `0..len` whose snapshot fails, or `None` if none does.
///
/// `at` builds the snapshot (and its log label) for an index. `len` must be
/// at least 1.
pub(crate) fn search<O, F>(
    session: &mut Session<'_, O>,
    len: usize,
    at: F,
) -> Result<Option<usize>, Halt>
where
    O: Oracle + ?Sized,
    F: Fn(usize) -> Result<(Snapshot, ProbeTag), BisectError>,
{
    if len == 0 {
        return Err(Halt::Failed(BisectError::EmptySequence));
    }

    let mut lo = 0;
    let mut hi = len - 1;
    let mut saw_fail = false;

    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let (snapshot, tag) = at(mid)?;
        match session.probe(&snapshot, tag)? {
            Verdict::Fail => {
                hi = mid;
                saw_fail = true;
            }
            Verdict::Pass => lo = mid + 1,
        }
        debug!("search window now [{}, {}]", lo, hi);
    }

    if saw_fail {
        return Ok(Some(lo));
    }

    // Every probe passed, so lo == len - 1 and nothing has vouched for it.
    let (snapshot, tag) = at(lo)?;
    match session.probe(&snapshot, tag)? {
        Verdict::Fail => Ok(Some(lo)),
        Verdict::Pass => Ok(None),
    }
}

/// Bisect an explicit snapshot sequence.
pub(crate) fn run<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    sequence: &[Snapshot],
) -> Result<Outcome, Halt> {
    info!("Bisecting a sequence of {} snapshots", sequence.len());

    let found = search(session, sequence.len(), |i| {
        Ok((sequence[i].clone(), ProbeTag::new(Phase::Sequence).index(i)))
    })?;

    let index = match found {
        Some(index) => index,
        None => return Ok(Outcome::NotFound),
    };
    info!("First failing snapshot: #{}", index);

    if session.config().verify_boundary {
        verify(session, sequence, index)?;
    }
    Ok(Outcome::FoundIndex { index })
}

/// Re-check the boundary pair without trusting the memo.
fn verify<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    sequence: &[Snapshot],
    index: usize,
) -> Result<(), Halt> {
    let tag = ProbeTag::new(Phase::Verify).index(index);
    if session.probe_fresh(&sequence[index], tag)? == Verdict::Pass {
        return Err(Halt::Violated(Violation::new(
            ViolationKind::Inconsistent,
            format!(
                "snapshot #{} failed during the search but passes on re-check",
                index
            ),
        )));
    }

    if index > 0 {
        let before = index - 1;
        let tag = ProbeTag::new(Phase::Verify).index(before);
        if session.probe_fresh(&sequence[before], tag)? == Verdict::Fail {
            return Err(Halt::Violated(Violation::new(
                ViolationKind::Inconsistent,
                format!(
                    "snapshot #{} passed during the search but fails on re-check",
                    before
                ),
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::bisector::Bisector;
    use crate::config::SearchConfig;
    use crate::environment::Snapshot;
    use crate::error::BisectError;
    use crate::oracle::{CancelToken, OracleError, Verdict};
    use crate::result::{Outcome, Phase, StopReason, ViolationKind};
    use crate::version::Version;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Snapshots `pkg == 0 .. n-1`.
    fn sequence(n: usize) -> Vec<Snapshot> {
        (0..n)
            .map(|i| Snapshot::from_pairs([("pkg", Version::parse(&i.to_string()).unwrap())]))
            .collect()
    }

    fn index_of(snapshot: &Snapshot) -> usize {
        snapshot.get("pkg").unwrap().as_str().parse().unwrap()
    }

    /// Fails from index `bad` on; `None` never fails.
    fn first_bad(bad: Option<usize>) -> impl Fn(&Snapshot) -> Result<Verdict, OracleError> + Send + Sync {
        move |s: &Snapshot| {
            Ok(match bad {
                Some(b) if index_of(s) >= b => Verdict::Fail,
                _ => Verdict::Pass,
            })
        }
    }

    fn ceil_log2(n: usize) -> usize {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }

    #[test]
    fn test_twenty_snapshots() {
        let seq = sequence(20);
        for bad in [14, 1, 19] {
            let oracle = first_bad(Some(bad));
            let result = crate::bisect(&seq, &oracle).unwrap();
            assert_eq!(result.outcome, Outcome::FoundIndex { index: bad });
            assert!(result.oracle_calls <= ceil_log2(20), "bad={}", bad);
            assert_eq!(result.oracle_calls, result.log.len());
        }
    }

    #[test]
    fn test_first_snapshot_bad() {
        let seq = sequence(7);
        let result = crate::bisect(&seq, &first_bad(Some(0))).unwrap();
        assert_eq!(result.found_index(), Some(0));
    }

    #[test]
    fn test_nothing_fails() {
        for n in [1, 2, 5, 20] {
            let result = crate::bisect(&sequence(n), &first_bad(None)).unwrap();
            assert_eq!(result.outcome, Outcome::NotFound, "n={}", n);
            // the last snapshot is always re-checked before giving up
            assert_eq!(result.log.last().unwrap().snapshot, sequence(n)[n - 1]);
        }
    }

    #[test]
    fn test_single_snapshot() {
        let seq = sequence(1);
        let result = crate::bisect(&seq, &first_bad(Some(0))).unwrap();
        assert_eq!(result.found_index(), Some(0));
        assert_eq!(result.oracle_calls, 1);
    }

    #[test]
    fn test_empty_sequence_is_an_error() {
        let err = crate::bisect(&[], &first_bad(None)).unwrap_err();
        assert!(matches!(err, BisectError::EmptySequence));
    }

    #[test]
    fn test_floor_midpoint_probe_order() {
        let seq = sequence(8);
        let result = crate::bisect(&seq, &first_bad(Some(5))).unwrap();
        let probed: Vec<_> = result.log.iter().map(|r| r.index.unwrap()).collect();
        assert_eq!(probed, vec![3, 5, 4]);
        assert!(result.log.iter().all(|r| r.phase == Phase::Sequence));
    }

    #[test]
    fn test_random_monotonic_sequences() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let n = rng.gen_range(1..=200);
            let bad = if rng.gen_bool(0.1) {
                None
            } else {
                Some(rng.gen_range(0..n))
            };
            let seq = sequence(n);
            let result = crate::bisect(&seq, &first_bad(bad)).unwrap();

            match bad {
                Some(b) => assert_eq!(result.found_index(), Some(b), "n={} b={}", n, b),
                None => assert_eq!(result.outcome, Outcome::NotFound, "n={}", n),
            }

            // The all-pass path needs one extra call when n is a power of two,
            // since "nothing fails" is an (n+1)-th possible answer.
            let limit = match bad {
                Some(b) if b + 1 < n => ceil_log2(n),
                _ => ceil_log2(n + 1),
            };
            assert!(
                result.oracle_calls <= limit,
                "n={} bad={:?} calls={}",
                n,
                bad,
                result.oracle_calls
            );
        }
    }

    #[test]
    fn test_deterministic_log() {
        let seq = sequence(37);
        let oracle = first_bad(Some(23));
        let a = crate::bisect(&seq, &oracle).unwrap();
        let b = crate::bisect(&seq, &oracle).unwrap();
        let strip = |r: &crate::BisectionResult| {
            r.log
                .iter()
                .map(|p| (p.snapshot.clone(), p.verdict))
                .collect::<Vec<_>>()
        };
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(strip(&a), strip(&b));
    }

    #[test]
    fn test_cancel_returns_partial_log() {
        let seq = sequence(64);
        let cancel = CancelToken::new();
        let calls = AtomicUsize::new(0);
        let token = cancel.clone();
        let oracle = move |s: &Snapshot| -> Result<Verdict, OracleError> {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                token.cancel();
            }
            Ok(if index_of(s) >= 40 {
                Verdict::Fail
            } else {
                Verdict::Pass
            })
        };

        let result = Bisector::new(&oracle)
            .with_cancel(cancel)
            .bisect(&seq)
            .unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Incomplete {
                reason: StopReason::Cancelled
            }
        );
        assert_eq!(result.oracle_calls, 2);
        assert_eq!(result.log.len(), 2);
    }

    #[test]
    fn test_probe_budget() {
        let seq = sequence(64);
        let config = SearchConfig {
            max_probes: Some(3),
            ..SearchConfig::default()
        };
        let result = Bisector::new(&first_bad(Some(40)))
            .with_config(config)
            .bisect(&seq)
            .unwrap();
        assert_eq!(
            result.outcome,
            Outcome::Incomplete {
                reason: StopReason::ProbeBudgetExhausted
            }
        );
        assert_eq!(result.oracle_calls, 3);
    }

    #[test]
    fn test_resume_from_saved_verdicts() {
        let seq = sequence(64);
        let oracle = first_bad(Some(40));
        let config = SearchConfig {
            max_probes: Some(3),
            ..SearchConfig::default()
        };
        let partial = Bisector::new(&oracle)
            .with_config(config)
            .bisect(&seq)
            .unwrap();

        let resumed = Bisector::new(&oracle)
            .with_known_verdicts(partial.verdicts())
            .bisect(&seq)
            .unwrap();
        let full = crate::bisect(&seq, &oracle).unwrap();

        assert_eq!(resumed.found_index(), Some(40));
        assert_eq!(resumed.oracle_calls + partial.oracle_calls, full.oracle_calls);
    }

    #[test]
    fn test_oracle_error_keeps_partial_log() {
        let seq = sequence(16);
        let oracle = |s: &Snapshot| -> Result<Verdict, OracleError> {
            match index_of(s) {
                3 => Err(OracleError::Timeout(std::time::Duration::from_secs(30))),
                i if i >= 2 => Ok(Verdict::Fail),
                _ => Ok(Verdict::Pass),
            }
        };
        let err = crate::bisect(&seq, &oracle).unwrap_err();
        // probes 7 (fail), then 3 (error)
        let log = err.partial_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].index, Some(7));
        match err {
            BisectError::Oracle(failure) => {
                assert_eq!(failure.oracle_calls, 1);
                assert_eq!(index_of(&failure.snapshot), 3);
                assert_eq!(failure.phase, Phase::Sequence);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_verify_confirms_boundary() {
        let seq = sequence(20);
        let config = SearchConfig {
            verify_boundary: true,
            ..SearchConfig::default()
        };
        let plain = crate::bisect(&seq, &first_bad(Some(14))).unwrap();
        let verified = Bisector::new(&first_bad(Some(14)))
            .with_config(config)
            .bisect(&seq)
            .unwrap();
        assert_eq!(verified.found_index(), Some(14));
        assert_eq!(verified.oracle_calls, plain.oracle_calls + 2);
        let tail: Vec<_> = verified.log[plain.oracle_calls..]
            .iter()
            .map(|r| (r.phase, r.index))
            .collect();
        assert_eq!(tail, vec![(Phase::Verify, Some(14)), (Phase::Verify, Some(13))]);
    }

    #[test]
    fn test_verify_detects_flaky_boundary() {
        let seq = sequence(20);
        let flipped = AtomicBool::new(false);
        // index 14 fails once, then passes
        let oracle = |s: &Snapshot| -> Result<Verdict, OracleError> {
            let i = index_of(s);
            if i == 14 && flipped.swap(true, Ordering::SeqCst) {
                return Ok(Verdict::Pass);
            }
            Ok(if i >= 14 { Verdict::Fail } else { Verdict::Pass })
        };
        let config = SearchConfig {
            verify_boundary: true,
            ..SearchConfig::default()
        };
        let result = Bisector::new(&oracle).with_config(config).bisect(&seq).unwrap();
        match result.outcome {
            Outcome::InvariantViolation { violation } => {
                assert_eq!(violation.kind, ViolationKind::Inconsistent)
            }
            other => panic!("expected a violation, got {:?}", other),
        }
    }
}
