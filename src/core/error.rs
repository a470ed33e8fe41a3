//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::TaskStatus;
use crate::util::serde::{ResourceKind, TaskId};

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Submission rejected before it reached the queue.
    #[error("invalid task: {0}")]
    Validation(String),
    /// Submitting user is not known to the user directory.
    #[error("unknown user: {0}")]
    UnknownUser(String),
    /// Declared requirement can never fit the ledger capacity.
    #[error("requirement exceeds capacity for {resource}: requested {requested}, capacity {capacity}")]
    ExceedsCapacity {
        /// Resource that does not fit.
        resource: ResourceKind,
        /// Amount the task declared.
        requested: f64,
        /// Total capacity of the ledger.
        capacity: f64,
    },
    /// No table holds the task.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// Only queued tasks can be cancelled.
    #[error("task {id} cannot be cancelled while {status}")]
    NotCancellable {
        /// Task identifier.
        id: TaskId,
        /// Status at the time of the request.
        status: TaskStatus,
    },
    /// Report from an attempt that is no longer the running one.
    #[error("attempt {attempt} of task {id} is no longer running")]
    StaleAttempt {
        /// Task identifier.
        id: TaskId,
        /// Attempt that sent the report.
        attempt: u32,
    },
    /// Concurrency cap must be at least one.
    #[error("invalid concurrency cap: {0}")]
    InvalidConcurrency(usize),
    /// Checkpoint could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Configuration failed validation.
    #[error("config invalid: {0}")]
    Config(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
