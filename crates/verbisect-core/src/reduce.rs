//! Diff bisection: find the minimal set of axis changes behind a failure.
//!
//! One changed axis is a plain binary search over its candidates. With more
//! than one, the search runs in two phases:
//!
//! 1. **Localize**: cumulative snapshots (`good` with axes `0..=i` moved to
//!    their bad value, in component-name order) are bisected to find the
//!    first one that fails, at axis `b`.
//! 2. **Reduce**: starting from cumulative snapshot `b`, each axis still at
//!    its bad value is reverted to good in turn. A revert that still fails is
//!    kept; one that passes is undone. Passes repeat until nothing more can be
//!    reverted, leaving a 1-minimal culprit set.
//!
//! The baseline of the reduction is an `Assignment` value that is replaced,
//! never mutated, at each step.

use crate::environment::{Diff, DiffEntry, Environment, EnvironmentError, Snapshot};
use crate::oracle::{Oracle, Verdict};
use crate::result::{Culprits, Outcome, Phase, Violation, ViolationKind};
use crate::sequence::search;
use crate::session::{Halt, ProbeTag, Session};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Which axes are moved away from good, and to which candidate.
///
/// Keys are axis positions in the diff, values index the axis's candidates.
/// Axes that are absent stay at their good value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Assignment {
    choices: BTreeMap<usize, usize>,
}

impl Assignment {
    fn with(&self, axis: usize, choice: usize) -> Self {
        let mut choices = self.choices.clone();
        choices.insert(axis, choice);
        Self { choices }
    }

    fn without(&self, axis: usize) -> Self {
        let mut choices = self.choices.clone();
        choices.remove(&axis);
        Self { choices }
    }

    fn axes(&self) -> Vec<usize> {
        self.choices.keys().copied().collect()
    }

    fn contains(&self, axis: usize) -> bool {
        self.choices.contains_key(&axis)
    }

    fn len(&self) -> usize {
        self.choices.len()
    }

    fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

/// The good environment plus the changed axes, and how to combine them.
struct Axes<'d> {
    good: &'d Environment,
    entries: &'d [DiffEntry],
}

impl<'d> Axes<'d> {
    fn component(&self, axis: usize) -> &'d str {
        let entries = self.entries;
        &entries[axis].component
    }

    /// Axis at its bad value.
    fn bad_choice(&self, axis: usize) -> usize {
        self.entries[axis].len() - 1
    }

    /// Axes `0..=last` at their bad values.
    fn cumulative(&self, last: usize) -> Assignment {
        let choices = (0..=last).map(|axis| (axis, self.bad_choice(axis))).collect();
        Assignment { choices }
    }

    fn snapshot(&self, assignment: &Assignment) -> Result<Snapshot, EnvironmentError> {
        let mut snapshot = self.good.clone();
        for (&axis, &choice) in &assignment.choices {
            let entry = &self.entries[axis];
            snapshot = snapshot.with_pin(&entry.component, entry.candidates[choice].as_ref())?;
        }
        Ok(snapshot)
    }

    fn tag(&self, phase: Phase, axis: usize) -> ProbeTag {
        ProbeTag::new(phase).axis(self.component(axis))
    }

    fn culprits(&self, assignment: &Assignment) -> Culprits {
        assignment
            .choices
            .iter()
            .map(|(&axis, &choice)| {
                let entry = &self.entries[axis];
                (entry.component.clone(), entry.candidates[choice].clone())
            })
            .collect()
    }
}

/// Bisect the changed axes of `diff` on top of `good`.
pub(crate) fn run<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    good: &Environment,
    diff: &Diff,
) -> Result<Outcome, Halt> {
    let axes = Axes {
        good,
        entries: diff.entries(),
    };

    match axes.entries.len() {
        0 => {
            info!("Good and bad environments are identical, nothing to bisect");
            Ok(Outcome::NotFound)
        }
        1 => single_axis(session, &axes),
        k => {
            info!("Bisecting {} changed components", k);
            multi_axis(session, &axes)
        }
    }
}

fn single_axis<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    axes: &Axes<'_>,
) -> Result<Outcome, Halt> {
    let entry = &axes.entries[0];
    info!(
        "Single changed component {} with {} candidates",
        entry.component,
        entry.len()
    );

    let found = search(session, entry.len(), |i| {
        let snapshot = axes.snapshot(&Assignment::default().with(0, i))?;
        Ok((snapshot, axes.tag(Phase::Sequence, 0).index(i)))
    })?;

    match found {
        Some(choice) => report(session, axes, &Assignment::default().with(0, choice)),
        None => Ok(Outcome::NotFound),
    }
}

fn multi_axis<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    axes: &Axes<'_>,
) -> Result<Outcome, Halt> {
    let found = search(session, axes.entries.len(), |i| {
        let snapshot = axes.snapshot(&axes.cumulative(i))?;
        Ok((snapshot, axes.tag(Phase::Localize, i).index(i)))
    })?;

    let localized = match found {
        Some(axis) => axis,
        None => {
            info!("The bad environment passes, nothing to blame");
            return Ok(Outcome::NotFound);
        }
    };
    info!(
        "Localized failure to {} (axis {}), reducing",
        axes.component(localized),
        localized
    );

    let reduced = reduce(session, axes, axes.cumulative(localized))?;
    if !reduced.contains(localized) {
        return Err(Halt::Violated(Violation::new(
            ViolationKind::NonMonotonic,
            format!(
                "culprit set {{{}}} fails on its own but passed together with every change \
                 before {}",
                names(axes, &reduced),
                axes.component(localized)
            ),
        )));
    }

    let culprits = if session.config().refine_versions {
        refine(session, axes, reduced)?
    } else {
        reduced
    };
    report(session, axes, &culprits)
}

/// Delta-debugging passes until one reverts nothing.
fn reduce<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    axes: &Axes<'_>,
    start: Assignment,
) -> Result<Assignment, Halt> {
    let mut baseline = start;
    let mut round = 0;
    loop {
        round += 1;
        let (next, reverted) = if session.config().is_parallel() {
            reduction_pass_parallel(session, axes, &baseline)?
        } else {
            reduction_pass(session, axes, &baseline)?
        };

        if next.is_empty() {
            return Err(Halt::Violated(Violation::new(
                ViolationKind::GoodBaselineFails,
                "every changed component was reverted to its good version and the check \
                 still fails",
            )));
        }

        info!(
            "Reduction pass {}: reverted {}, {} remaining ({} oracle calls so far)",
            round,
            reverted,
            next.len(),
            session.calls()
        );
        baseline = next;
        if reverted == 0 {
            return Ok(baseline);
        }
    }
}

/// Try reverting each axis of `baseline`, one at a time, in axis order.
fn reduction_pass<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    axes: &Axes<'_>,
    baseline: &Assignment,
) -> Result<(Assignment, usize), Halt> {
    let mut current = baseline.clone();
    let mut reverted = 0;

    for axis in baseline.axes() {
        let trial = current.without(axis);
        let verdict = session.probe(&axes.snapshot(&trial)?, axes.tag(Phase::Reduce, axis))?;
        if verdict.is_fail() {
            debug!("{} is not needed for the failure", axes.component(axis));
            current = trial;
            reverted += 1;
            if current.is_empty() {
                break;
            }
        } else {
            debug!("{} is needed for the failure", axes.component(axis));
        }
    }
    Ok((current, reverted))
}

/// Same result as [`reduction_pass`], with the reverts of a pass probed
/// concurrently against the current baseline.
///
/// Results are applied in axis order: the first revert that still fails is
/// kept and everything probed after it is stale, because it was measured
/// against the old baseline.
fn reduction_pass_parallel<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    axes: &Axes<'_>,
    baseline: &Assignment,
) -> Result<(Assignment, usize), Halt> {
    let order = baseline.axes();
    let mut current = baseline.clone();
    let mut reverted = 0;
    let mut next = 0;

    while next < order.len() {
        let batch = order[next..]
            .iter()
            .map(|&axis| -> Result<(Snapshot, ProbeTag), EnvironmentError> {
                let snapshot = axes.snapshot(&current.without(axis))?;
                Ok((snapshot, axes.tag(Phase::Reduce, axis)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let verdicts = session.probe_batch(batch)?;

        let kept = match verdicts.iter().position(|v| *v == Verdict::Fail) {
            Some(offset) => offset,
            None => break,
        };
        let axis = order[next + kept];
        debug!("{} is not needed for the failure", axes.component(axis));
        current = current.without(axis);
        reverted += 1;

        let stale = verdicts.len() - kept - 1;
        if stale > 0 {
            warn!(
                "Discarding {} speculative probes measured before {} was reverted",
                stale,
                axes.component(axis)
            );
        }
        next += kept + 1;
        if current.is_empty() {
            break;
        }
    }
    Ok((current, reverted))
}

/// Bisect each culprit axis over its candidates, in axis order.
fn refine<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    axes: &Axes<'_>,
    culprits: Assignment,
) -> Result<Assignment, Halt> {
    let mut current = culprits;
    for axis in current.axes() {
        let entry = &axes.entries[axis];
        if entry.len() < 2 {
            continue;
        }
        info!(
            "Refining {} over {} candidates",
            entry.component,
            entry.len()
        );

        let found = search(session, entry.len(), |i| {
            let snapshot = axes.snapshot(&current.with(axis, i))?;
            Ok((snapshot, axes.tag(Phase::Refine, axis).index(i)))
        })?;

        match found {
            Some(choice) => current = current.with(axis, choice),
            None => {
                return Err(Halt::Violated(Violation::new(
                    ViolationKind::Inconsistent,
                    format!(
                        "{} passes at every candidate although the culprit set failed",
                        entry.component
                    ),
                )))
            }
        }
    }
    Ok(current)
}

/// Optionally verify, then report the culprit set.
fn report<O: Oracle + ?Sized>(
    session: &mut Session<'_, O>,
    axes: &Axes<'_>,
    culprits: &Assignment,
) -> Result<Outcome, Halt> {
    if session.config().verify_boundary {
        let good = session.probe(axes.good, ProbeTag::new(Phase::Verify))?;
        if good.is_fail() {
            return Err(Halt::Violated(Violation::new(
                ViolationKind::GoodBaselineFails,
                "the good environment fails the check",
            )));
        }

        let snapshot = axes.snapshot(culprits)?;
        if session.probe_fresh(&snapshot, ProbeTag::new(Phase::Verify))? == Verdict::Pass {
            return Err(Halt::Violated(Violation::new(
                ViolationKind::Inconsistent,
                format!(
                    "culprit snapshot {} failed during the search but passes on re-check",
                    snapshot
                ),
            )));
        }
    }

    info!("Culprits: {}", names(axes, culprits));
    Ok(Outcome::FoundCulprits {
        culprits: axes.culprits(culprits),
    })
}

fn names(axes: &Axes<'_>, assignment: &Assignment) -> String {
    assignment
        .choices
        .keys()
        .map(|&axis| axes.component(axis))
        .collect::<Vec<_>>()
        .join(", ")
}
