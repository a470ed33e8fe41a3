//! Work item model: the mutable task owned by the scheduler, the submission
//! spec it is built from, and the serializable record projected from it.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::{SchedulerError, TaskExecutor};
use crate::util::serde::{timestamp, Priority, ResourceVector, TaskId, TaskKind};

/// Status of a task in the scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the admission queue.
    Pending,
    /// Admitted and running on a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Failed with retries exhausted, or failed explicitly by the work function.
    Failed,
    /// Removed from the queue before it started.
    Cancelled,
}

impl TaskStatus {
    /// Every status in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Whether the task will never run again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation signal shared between the scheduler and a
/// running work function. The scheduler only ever sets it; stopping is up to
/// the work function.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the work function to stop.
    pub fn request(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }
}

/// Per-task fallbacks applied when a spec or record leaves a limit unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDefaults {
    /// Timeout for a single attempt. Zero disables the timeout.
    pub timeout: Duration,
    /// Retry bound.
    pub max_retries: u32,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            max_retries: 3,
        }
    }
}

/// Everything a caller supplies to create a task.
///
/// ```rust,ignore
/// let spec = TaskSpec::new(TaskKind::AudioSynthesis, "alice")
///     .with_priority(Priority::High)
///     .with_param("text", "hello")
///     .with_executor(TtsExecutor::new(client));
/// let id = service.create_task(spec)?;
/// ```
#[derive(Clone)]
pub struct TaskSpec {
    pub(crate) kind: TaskKind,
    pub(crate) params: Map<String, Value>,
    pub(crate) user_id: String,
    pub(crate) priority: Priority,
    pub(crate) executor: Option<Arc<dyn TaskExecutor>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) max_retries: Option<u32>,
    pub(crate) resources: Option<ResourceVector>,
}

impl TaskSpec {
    /// Spec with normal priority, no parameters and default limits.
    pub fn new(kind: TaskKind, user_id: impl Into<String>) -> Self {
        Self {
            kind: kind.normalized(),
            params: Map::new(),
            user_id: user_id.into(),
            priority: Priority::Normal,
            executor: None,
            timeout: None,
            max_retries: None,
            resources: None,
        }
    }

    /// Replace the parameter map.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Add one parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach the work function.
    #[must_use]
    pub fn with_executor(self, executor: impl TaskExecutor) -> Self {
        self.with_shared_executor(Arc::new(executor))
    }

    /// Attach an already shared work function.
    #[must_use]
    pub fn with_shared_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Timeout for each attempt. Zero disables the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry bound.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Declared resource requirement.
    #[must_use]
    pub fn with_resources(mut self, resources: ResourceVector) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Checks that do not depend on scheduler state.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Validation`] for an empty user id or a
    /// negative/non-finite resource amount.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.user_id.trim().is_empty() {
            return Err(SchedulerError::Validation("user id must not be empty".into()));
        }
        if let Some((kind, amount)) = self.resources.as_ref().and_then(ResourceVector::invalid_entry) {
            return Err(SchedulerError::Validation(format!(
                "resource `{kind}` must be a non-negative number, got {amount}"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("kind", &self.kind)
            .field("user_id", &self.user_id)
            .field("priority", &self.priority)
            .field("has_executor", &self.executor.is_some())
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

/// Transport-neutral projection of a task, used for status queries and as
/// the checkpoint record. Parameters and the work function are never part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task identifier.
    pub task_id: TaskId,
    /// Kind of work.
    pub task_type: TaskKind,
    /// Submitting user.
    pub username: String,
    /// Priority.
    pub priority: Priority,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Creation time.
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    /// Start of the current attempt.
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached a terminal status.
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Progress percentage in `[0, 100]`.
    pub progress: f64,
    /// Result of a successful run.
    pub result: Option<Value>,
    /// Error of a failed run.
    pub error: Option<String>,
    /// Retries consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Retry bound; the scheduler default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Attempt timeout in milliseconds; the scheduler default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Declared requirement; the task default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceVector>,
}

/// A unit of schedulable work. Owned by the scheduler; callers only ever see
/// [`TaskRecord`] projections.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
    pub(crate) params: Arc<Map<String, Value>>,
    pub(crate) user_id: String,
    pub(crate) priority: Priority,
    pub(crate) status: TaskStatus,
    pub(crate) progress: f64,
    pub(crate) created_at: DateTime<Utc>,
    /// Time used for queue ordering; differs from `created_at` only under
    /// the requeue retry policy.
    pub(crate) ordered_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) retry_count: u32,
    pub(crate) max_retries: u32,
    pub(crate) timeout: Duration,
    pub(crate) resources: ResourceVector,
    pub(crate) executor: Option<Arc<dyn TaskExecutor>>,
    pub(crate) cancellation: CancellationFlag,
}

impl Task {
    /// Build a fresh pending task with a new identifier.
    pub(crate) fn from_spec(spec: TaskSpec, defaults: TaskDefaults, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: spec.kind.normalized(),
            params: Arc::new(spec.params),
            user_id: spec.user_id,
            priority: spec.priority,
            status: TaskStatus::Pending,
            progress: 0.0,
            created_at: now,
            ordered_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(defaults.max_retries),
            timeout: spec.timeout.unwrap_or(defaults.timeout),
            resources: spec.resources.unwrap_or_else(ResourceVector::task_default),
            executor: spec.executor,
            cancellation: CancellationFlag::new(),
        }
    }

    /// Rebuild a task from its checkpoint record. Parameters are gone for good.
    pub(crate) fn from_record(
        record: TaskRecord,
        defaults: TaskDefaults,
        executor: Option<Arc<dyn TaskExecutor>>,
    ) -> Self {
        let max_retries = record.max_retries.unwrap_or(defaults.max_retries);
        Self {
            id: record.task_id,
            kind: record.task_type.normalized(),
            params: Arc::new(Map::new()),
            user_id: record.username,
            priority: record.priority,
            status: record.status,
            progress: record.progress.clamp(0.0, 100.0),
            created_at: record.created_at,
            ordered_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            result: record.result,
            error: record.error,
            retry_count: record.retry_count.min(max_retries),
            max_retries,
            timeout: record
                .timeout_ms
                .map_or(defaults.timeout, Duration::from_millis),
            resources: record.resources.unwrap_or_else(ResourceVector::task_default),
            executor,
            cancellation: CancellationFlag::new(),
        }
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Kind of work.
    #[must_use]
    pub const fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Submitting user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Declared requirement.
    #[must_use]
    pub const fn resources(&self) -> &ResourceVector {
        &self.resources
    }

    /// Project to the transport record.
    #[must_use]
    pub fn to_record(&self) -> TaskRecord {
        TaskRecord {
            task_id: self.id,
            task_type: self.kind.clone(),
            username: self.user_id.clone(),
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
            retry_count: self.retry_count,
            max_retries: Some(self.max_retries),
            timeout_ms: Some(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)),
            resources: Some(self.resources.clone()),
        }
    }

    /// Admission order: higher priority first, then earlier ordering time,
    /// then identifier so the order is total.
    #[must_use]
    pub fn admission_cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.ordered_at.cmp(&other.ordered_at))
            .then_with(|| self.id.cmp(&other.id))
    }

    pub(crate) fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
        self.progress = 0.0;
    }

    /// Raise progress, never lowering it. Returns the stored value.
    pub(crate) fn advance_progress(&mut self, progress: f64) -> f64 {
        let clamped = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 100.0) };
        if clamped > self.progress {
            self.progress = clamped;
        }
        self.progress
    }

    /// Whether another attempt is allowed.
    pub(crate) const fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Put the task back into `pending` for its next attempt. The next
    /// attempt gets a fresh cancellation flag.
    pub(crate) fn reset_for_retry(&mut self, ordered_at: DateTime<Utc>) {
        self.retry_count += 1;
        self.cancellation = CancellationFlag::new();
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.progress = 0.0;
        self.result = None;
        self.error = None;
        self.ordered_at = ordered_at;
    }

    pub(crate) fn complete(&mut self, result: Option<Value>, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.progress = 100.0;
        self.result = result;
        self.error = None;
        self.completed_at = Some(now);
    }

    pub(crate) fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.result = None;
        self.completed_at = Some(now);
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.cancellation.request();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("user_id", &self.user_id)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("progress", &self.progress)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
