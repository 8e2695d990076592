//! Unit tests for Job functionality.

use chrono::Duration;
use qml_queue::{Backoff, Job, JobOptions, JobStatus, QmlError, DEFAULT_MAX_ATTEMPTS};
use serde_json::json;

#[test]
fn test_job_creation() {
    let job = Job::new("email:send", json!({ "to": "user@example.com" }));

    assert!(!job.id.is_empty());
    assert_eq!(job.job_type, "email:send");
    assert_eq!(job.payload["to"], "user@example.com");
    assert_eq!(job.priority, 0);
    assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
    assert_eq!(job.attempts_made, 0);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.not_before, job.created_at);
    assert_eq!(job.backoff, Backoff::default());
    assert!(job.last_error.is_none());
    assert!(job.result.is_none());
    assert!(!job.cancel_requested);
}

#[test]
fn test_unique_ids() {
    let first = Job::new("email:send", json!({}));
    let second = Job::new("email:send", json!({}));
    assert_ne!(first.id, second.id);
}

#[test]
fn test_job_with_options() {
    let options = JobOptions::new()
        .priority(10)
        .delay_ms(5_000)
        .max_attempts(5)
        .backoff(Backoff::fixed(250))
        .timeout_ms(2_000);

    let job = Job::with_options("order:process", json!({ "orderId": 42 }), &options).unwrap();

    assert_eq!(job.job_type, "order:process");
    assert_eq!(job.priority, 10);
    assert_eq!(job.max_attempts, 5);
    assert_eq!(job.backoff, Backoff::fixed(250));
    assert_eq!(job.timeout_ms, Some(2_000));
    assert_eq!(job.not_before - job.created_at, Duration::milliseconds(5_000));
}

#[test]
fn test_job_options_validation() {
    let invalid = [
        JobOptions::new().priority(-1),
        JobOptions::new().delay_ms(-10),
        JobOptions::new().max_attempts(0),
        JobOptions::new().timeout_ms(0),
    ];

    for options in invalid {
        let result = Job::with_options("email:send", json!({}), &options);
        assert!(
            matches!(result, Err(QmlError::ValidationError { .. })),
            "{:?} should be rejected",
            options
        );
    }
}

#[test]
fn test_empty_type_rejected() {
    for job_type in ["", "   "] {
        let result = Job::with_options(job_type, json!({}), &JobOptions::new());
        assert!(matches!(result, Err(QmlError::ValidationError { .. })));
    }
}

#[test]
fn test_huge_delay_rejected_instead_of_overflowing() {
    let result = Job::with_options("email:send", json!({}), &JobOptions::new().delay_ms(i64::MAX));
    assert!(matches!(result, Err(QmlError::ValidationError { .. })));
}

#[test]
fn test_options_fall_back_to_queue_defaults() {
    let options = JobOptions::new().or_defaults(7, Backoff::fixed(10));
    assert_eq!(options.max_attempts, Some(7));
    assert_eq!(options.backoff, Some(Backoff::fixed(10)));

    let explicit = JobOptions::new()
        .max_attempts(2)
        .or_defaults(7, Backoff::fixed(10));
    assert_eq!(explicit.max_attempts, Some(2));
}

#[test]
fn test_options_from_json() {
    let options: JobOptions = serde_json::from_value(json!({
        "priority": 3,
        "delayMs": 100,
        "maxAttempts": 4,
        "backoff": { "type": "exponential", "baseDelayMs": 500, "maxDelayMs": 4000 }
    }))
    .unwrap();

    assert_eq!(options.priority, Some(3));
    assert_eq!(options.delay_ms, Some(100));
    assert_eq!(options.max_attempts, Some(4));
    assert_eq!(
        options.backoff,
        Some(Backoff::exponential(500).with_max_delay(4000))
    );
    assert_eq!(options.timeout_ms, None);
}

#[test]
fn test_job_serialization() {
    let mut job = Job::new("currency:convert", json!({ "amount": 100, "from": "USD" }));
    job.priority = 2;

    let serialized = job.serialize().expect("Serialization should succeed");
    assert!(serialized.contains("\"type\":\"currency:convert\""));
    assert!(serialized.contains("\"status\":\"pending\""));
    assert!(serialized.contains("\"maxAttempts\":3"));

    let deserialized = Job::deserialize(&serialized).expect("Deserialization should succeed");
    assert_eq!(deserialized.id, job.id);
    assert_eq!(deserialized.job_type, job.job_type);
    assert_eq!(deserialized.payload, job.payload);
    assert_eq!(deserialized.priority, 2);
}

#[test]
fn test_invalid_json_deserialization() {
    let result = Job::deserialize("{ not json");
    assert!(matches!(result, Err(QmlError::SerializationError { .. })));
}

#[test]
fn test_status_transitions_on_job() {
    let mut job = Job::new("email:send", json!({}));

    assert!(job.set_status(JobStatus::Active).is_ok());
    assert!(job.set_status(JobStatus::Retrying).is_ok());
    assert!(job.set_status(JobStatus::Pending).is_ok());
    assert!(job.set_status(JobStatus::Active).is_ok());
    assert!(job.set_status(JobStatus::Completed).is_ok());

    let result = job.set_status(JobStatus::Pending);
    assert!(matches!(
        result,
        Err(QmlError::InvalidStateTransition { .. })
    ));
    assert_eq!(job.status, JobStatus::Completed);
}

#[test]
fn test_attempts_left() {
    let mut job = Job::with_options("email:send", json!({}), &JobOptions::new().max_attempts(2)).unwrap();
    job.attempts_made = 1;
    assert!(job.has_attempts_left());
    job.attempts_made = 2;
    assert!(!job.has_attempts_left());
}

#[test]
fn test_duration_requires_finish() {
    let mut job = Job::new("email:send", json!({}));
    assert_eq!(job.duration_ms(), None);

    let start = job.created_at;
    job.started_at = Some(start);
    job.finished_at = Some(start + Duration::milliseconds(1500));
    assert_eq!(job.duration_ms(), Some(1500));
}
