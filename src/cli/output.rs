//! Human-readable formatting for setup-orchestrator progress and errors.

use crate::error::Error;
use crate::setup::{ProgressEvent, SetupOutcome};
use std::fmt::Write as _;

/// Formats one progress tick for `--verbose` bulk-setup output.
#[must_use]
pub fn format_progress(event: &ProgressEvent) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "[{}/{}] {:.0}s elapsed",
        event.processed,
        event.total,
        event.elapsed.as_secs_f64()
    );
    if let Some(eta) = event.eta {
        let _ = write!(out, ", eta {:.0}s", eta.as_secs_f64());
    }
    if !event.current_file.is_empty() {
        let _ = write!(out, " — {}", event.current_file);
    }
    out
}

/// Formats a terminal setup-run summary.
#[must_use]
pub fn format_outcome(outcome: &SetupOutcome) -> String {
    match outcome {
        SetupOutcome::Completed { processed, failed, timed_out } => {
            format!("setup complete: {processed} indexed, {failed} failed, {timed_out} timed out")
        }
        SetupOutcome::Interrupted { processed } => {
            format!("setup interrupted after {processed} sessions; re-run with --resume to continue")
        }
    }
}

/// Formats a top-level error for stderr.
#[must_use]
pub fn format_error(error: &Error) -> String {
    format!("error: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_progress_includes_eta_and_file() {
        let event = ProgressEvent {
            processed: 3,
            total: 10,
            elapsed: Duration::from_secs(5),
            eta: Some(Duration::from_secs(12)),
            current_file: "session.jsonl".to_string(),
        };
        let out = format_progress(&event);
        assert!(out.contains("3/10"));
        assert!(out.contains("eta"));
        assert!(out.contains("session.jsonl"));
    }

    #[test]
    fn test_format_outcome_completed() {
        let outcome = SetupOutcome::Completed { processed: 4, failed: 1, timed_out: 0 };
        assert!(format_outcome(&outcome).contains("4 indexed"));
    }

    #[test]
    fn test_format_outcome_interrupted() {
        let outcome = SetupOutcome::Interrupted { processed: 2 };
        assert!(format_outcome(&outcome).contains("interrupted"));
    }
}
