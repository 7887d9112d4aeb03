//! Format bisection results for human consumption.

use verbisect_core::version::display_pin;
use verbisect_core::{BisectionResult, Diff, Outcome, ProbeRecord};

const RULE: &str = "═══════════════════════════════════════════════════════════════════════\n";

fn section(title: &str) -> String {
    let head = format!("─── {} ", title);
    let width = RULE.chars().count() - 1;
    let fill = width.saturating_sub(head.chars().count());
    format!("{}{}\n", head, "─".repeat(fill))
}

/// Format a bisection result: outcome, culprits and the probe log.
pub fn format_result(result: &BisectionResult) -> String {
    let mut output = String::new();

    output.push_str(RULE);
    output.push_str("  verbisect Report\n");
    output.push_str(RULE);
    output.push('\n');

    let status = match &result.outcome {
        Outcome::FoundIndex { .. } => "first failing snapshot found",
        Outcome::FoundCulprits { .. } => "culprits found",
        Outcome::NotFound => "no failing snapshot",
        Outcome::InvariantViolation { .. } => "INVARIANT VIOLATION",
        Outcome::Incomplete { .. } => "incomplete",
    };
    output.push_str(&format!("Outcome:       {}\n", status));
    output.push_str(&format!("Oracle calls:  {}\n", result.oracle_calls));
    let total_ms: u64 = result.log.iter().map(|r| r.elapsed_ms).sum();
    output.push_str(&format!("Time in checks: {:.1}s\n", total_ms as f64 / 1000.0));
    output.push('\n');

    match &result.outcome {
        Outcome::FoundIndex { index } => {
            output.push_str(&section("Boundary"));
            output.push_str(&format!("Snapshot #{} is the first to fail.\n", index));
            if let Some(record) = result.log.iter().find(|r| r.index == Some(*index)) {
                output.push_str(&format!("  {}\n", record.snapshot));
            }
            output.push('\n');
        }
        Outcome::FoundCulprits { culprits } => {
            output.push_str(&section("Culprits"));
            let width = culprits.keys().map(|c| c.len()).max().unwrap_or(0);
            for (component, pin) in culprits {
                output.push_str(&format!(
                    "  {:<width$}  {}\n",
                    component,
                    display_pin(pin.as_ref()),
                    width = width
                ));
            }
            output.push('\n');
        }
        Outcome::NotFound => {
            output.push_str(&section("No Culprit"));
            output.push_str("Nothing in the searched range fails the check.\n\n");
        }
        Outcome::InvariantViolation { violation } => {
            output.push_str(&section("Invariant Violation"));
            output.push_str(&format!("Kind:    {}\n", violation.kind));
            output.push_str(&format!("Detail:  {}\n\n", violation.detail));
        }
        Outcome::Incomplete { reason } => {
            output.push_str(&section("Stopped Early"));
            output.push_str(&format!("Reason:  {}\n", reason));
            output.push_str("Resume with --resume on the saved report.\n\n");
        }
    }

    if !result.log.is_empty() {
        output.push_str(&section("Probe Log"));
        output.push_str(&format_log(&result.log));
        output.push('\n');
    }

    output.push_str(RULE);
    output
}

/// One line per probe: sequence number, phase, axis, verdict, time, snapshot.
pub fn format_log(log: &[ProbeRecord]) -> String {
    let axis_width = log
        .iter()
        .filter_map(|r| r.axis.as_ref().map(String::len))
        .max()
        .unwrap_or(1)
        .max(4);

    let mut output = format!(
        "{:>4}  {:<8}  {:<aw$}  {:>5}  {:<7}  {:>8}  snapshot\n",
        "#",
        "phase",
        "axis",
        "index",
        "verdict",
        "time",
        aw = axis_width
    );
    for record in log {
        output.push_str(&format!(
            "{:>4}  {:<8}  {:<aw$}  {:>5}  {:<7}  {:>6}ms  {}\n",
            record.seq,
            record.phase.to_string(),
            record.axis.as_deref().unwrap_or("-"),
            record
                .index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string()),
            record.verdict.to_string(),
            record.elapsed_ms,
            record.snapshot,
            aw = axis_width
        ));
    }
    output
}

/// Format the axes of a diff with their candidate counts.
pub fn format_diff(diff: &Diff) -> String {
    let mut output = String::new();
    if diff.is_empty() {
        output.push_str("No components changed.\n");
        return output;
    }

    output.push_str(&format!("{} changed components:\n", diff.len()));
    for entry in diff.entries() {
        output.push_str(&format!("  {}\n", entry));
        if entry.len() > 1 {
            let candidates: Vec<String> = entry
                .candidates
                .iter()
                .map(|c| display_pin(c.as_ref()))
                .collect();
            output.push_str(&format!("    {}\n", candidates.join(" → ")));
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use verbisect_core::{
        Culprits, EndpointsOnly, Environment, Phase, Snapshot, StaticRepository, StopReason,
        Verdict, Version, Violation, ViolationKind,
    };

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn record(seq: usize, verdict: Verdict) -> ProbeRecord {
        ProbeRecord {
            seq,
            phase: Phase::Reduce,
            axis: Some("numpy".to_string()),
            index: None,
            snapshot: Snapshot::from_pairs([("numpy", v("2.0"))]),
            verdict,
            elapsed_ms: 1500,
        }
    }

    #[test]
    fn test_format_culprits() {
        let mut culprits = Culprits::new();
        culprits.insert("numpy".to_string(), Some(v("2.0")));
        culprits.insert("six".to_string(), None);
        let result = BisectionResult {
            outcome: Outcome::FoundCulprits { culprits },
            oracle_calls: 2,
            log: vec![record(0, Verdict::Fail), record(1, Verdict::Pass)],
        };

        let text = format_result(&result);
        assert!(text.contains("verbisect Report"));
        assert!(text.contains("culprits found"));
        assert!(text.contains("numpy  2.0"));
        assert!(text.contains("six    <absent>"));
        assert!(text.contains("Time in checks: 3.0s"));
        assert!(text.contains("Probe Log"));
    }

    #[test]
    fn test_format_violation_and_incomplete() {
        let violation = BisectionResult {
            outcome: Outcome::InvariantViolation {
                violation: Violation::new(ViolationKind::GoodBaselineFails, "good fails"),
            },
            oracle_calls: 0,
            log: Vec::new(),
        };
        let text = format_result(&violation);
        assert!(text.contains("INVARIANT VIOLATION"));
        assert!(text.contains("good baseline fails"));
        assert!(!text.contains("Probe Log"));

        let stopped = BisectionResult {
            outcome: Outcome::Incomplete {
                reason: StopReason::Cancelled,
            },
            oracle_calls: 0,
            log: Vec::new(),
        };
        assert!(format_result(&stopped).contains("--resume"));
    }

    #[test]
    fn test_format_log_columns() {
        let text = format_log(&[record(0, Verdict::Fail)]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("   #  phase"));
        assert!(lines[1].contains("reduce"));
        assert!(lines[1].contains("FAIL"));
        assert!(lines[1].contains("1500ms"));
    }

    #[test]
    fn test_format_diff() {
        let good = Environment::from_pairs([("numpy", v("1.0")), ("six", v("1"))]);
        let bad = Environment::from_pairs([("numpy", v("1.2"))]);
        let repo = StaticRepository::new().with("numpy", [v("1.0"), v("1.1"), v("1.2")]);

        let diff = verbisect_core::diff(&good, &bad, &repo).unwrap();
        let text = format_diff(&diff);
        assert!(text.starts_with("2 changed components"));
        assert!(text.contains("1.1 → 1.2"));

        let same = verbisect_core::diff(&good, &good, &EndpointsOnly).unwrap();
        assert_eq!(format_diff(&same), "No components changed.\n");
    }
}
