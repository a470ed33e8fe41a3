//! Tests for error types

use prometheus_task_queue::core::{SchedulerError, TaskStatus};
use prometheus_task_queue::util::serde::{ResourceKind, TaskId};

#[test]
fn test_validation_error() {
    let err = SchedulerError::Validation("user id must not be empty".to_string());
    assert_eq!(format!("{err}"), "invalid task: user id must not be empty");
}

#[test]
fn test_exceeds_capacity_error() {
    let err = SchedulerError::ExceedsCapacity {
        resource: ResourceKind::Gpu,
        requested: 2.0,
        capacity: 1.0,
    };
    assert_eq!(
        format!("{err}"),
        "requirement exceeds capacity for gpu: requested 2, capacity 1"
    );
}

#[test]
fn test_not_cancellable_error() {
    let id = TaskId::nil();
    let err = SchedulerError::NotCancellable {
        id,
        status: TaskStatus::Processing,
    };
    assert_eq!(
        format!("{err}"),
        format!("task {id} cannot be cancelled while processing")
    );
}

#[test]
fn test_persistence_error() {
    let err = SchedulerError::Persistence("disk full".to_string());
    assert_eq!(format!("{err}"), "persistence error: disk full");
}

#[test]
fn test_invalid_concurrency_error() {
    assert_eq!(
        SchedulerError::InvalidConcurrency(0).to_string(),
        "invalid concurrency cap: 0"
    );
}

#[test]
fn test_stale_attempt_error() {
    let id = TaskId::nil();
    let err = SchedulerError::StaleAttempt { id, attempt: 0 };
    assert_eq!(
        err.to_string(),
        format!("attempt 0 of task {id} is no longer running")
    );
}
