//! Unit tests for JobStatus functionality.

use qml_queue::JobStatus;

#[test]
fn test_status_names() {
    let names: Vec<&str> = JobStatus::ALL.iter().map(|status| status.name()).collect();
    assert_eq!(
        names,
        vec!["pending", "active", "retrying", "completed", "failed"]
    );
    assert_eq!(JobStatus::Retrying.to_string(), "retrying");
}

#[test]
fn test_parse_round_trips_names() {
    for status in JobStatus::ALL {
        assert_eq!(JobStatus::parse(status.name()), Some(status));
    }
    assert_eq!(JobStatus::parse("COMPLETED"), Some(JobStatus::Completed));
    assert_eq!(JobStatus::parse("enqueued"), None);
    assert_eq!(JobStatus::parse(""), None);
}

#[test]
fn test_terminal_states() {
    assert!(JobStatus::Completed.is_terminal());
    assert!(JobStatus::Failed.is_terminal());
    assert!(!JobStatus::Pending.is_terminal());
    assert!(!JobStatus::Active.is_terminal());
    assert!(!JobStatus::Retrying.is_terminal());
}

#[test]
fn test_allowed_transitions() {
    let allowed = [
        (JobStatus::Pending, JobStatus::Active),
        (JobStatus::Active, JobStatus::Completed),
        (JobStatus::Active, JobStatus::Retrying),
        (JobStatus::Active, JobStatus::Failed),
        (JobStatus::Retrying, JobStatus::Pending),
    ];

    for from in JobStatus::ALL {
        for to in JobStatus::ALL {
            assert_eq!(
                from.can_transition_to(to),
                allowed.contains(&(from, to)),
                "{} -> {}",
                from,
                to
            );
        }
    }
}

#[test]
fn test_pending_cannot_skip_active() {
    assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
    assert!(!JobStatus::Retrying.can_transition_to(JobStatus::Active));
}

#[test]
fn test_status_serialization() {
    let json = serde_json::to_string(&JobStatus::Active).unwrap();
    assert_eq!(json, "\"active\"");

    let status: JobStatus = serde_json::from_str("\"retrying\"").unwrap();
    assert_eq!(status, JobStatus::Retrying);
}
