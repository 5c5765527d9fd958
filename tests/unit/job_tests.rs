//! Unit tests for job identifiers, exit statuses, and exit summaries.

use std::time::Duration;

use agent_relay::orchestrator::job::{ExitStatus, ExitSummary, JobId};

#[test]
fn job_ids_are_sequential_and_printable() {
    let id = JobId::from_seq(7);
    assert_eq!(id.as_str(), "job-7");
    assert_eq!(id.to_string(), "job-7");
    assert_eq!(id, JobId::from("job-7"));
    assert!(JobId::from_seq(1) < JobId::from_seq(2));
}

#[test]
fn only_zero_is_success() {
    assert!(ExitStatus { code: Some(0) }.success());
    assert!(!ExitStatus { code: Some(2) }.success());
    assert!(!ExitStatus { code: None }.success());
}

// ── Summaries ─────────────────────────────────────────────────────────────────

#[test]
fn failure_without_result_reports_code_and_time() {
    let summary = ExitSummary::classify(
        ExitStatus { code: Some(2) },
        false,
        Duration::from_millis(1500),
    );
    assert_eq!(
        summary.to_string(),
        "[agent failed with exit code 2 after 1.5s]"
    );
}

#[test]
fn signal_without_result_is_a_failure() {
    let summary = ExitSummary::classify(ExitStatus { code: None }, false, Duration::from_secs(3));
    assert_eq!(
        summary,
        ExitSummary::Failed {
            code: None,
            elapsed: Duration::from_secs(3)
        }
    );
    assert_eq!(summary.to_string(), "[agent terminated by signal after 3.0s]");
}

#[test]
fn clean_exit_without_result_ended() {
    let summary = ExitSummary::classify(ExitStatus { code: Some(0) }, false, Duration::ZERO);
    assert_eq!(
        summary.to_string(),
        "[agent ended after 0.0s without a final result]"
    );
}

#[test]
fn any_exit_with_result_finished() {
    for code in [Some(0), Some(1), None] {
        let summary =
            ExitSummary::classify(ExitStatus { code }, true, Duration::from_millis(400));
        assert_eq!(summary.to_string(), "[agent finished in 0.4s]", "code {code:?}");
    }
}
