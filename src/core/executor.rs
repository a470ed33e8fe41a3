//! Work function abstraction and the per-kind executor registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::{AppResult, CancellationFlag, SchedulerError, Task, TaskQueue};
use crate::util::serde::{Priority, TaskId, TaskKind};

/// What a work function gets to see of its task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task identifier.
    pub id: TaskId,
    /// Kind of work.
    pub kind: TaskKind,
    /// Submitting user.
    pub user_id: String,
    /// Priority.
    pub priority: Priority,
    /// Caller-supplied parameters. Empty for tasks restored from a checkpoint.
    pub params: Arc<Map<String, Value>>,
    /// Zero-based attempt number (equals the task's retry count).
    pub attempt: u32,
    /// Cooperative cancellation signal.
    pub cancellation: CancellationFlag,
    pub(crate) queue: Weak<TaskQueue>,
}

impl TaskContext {
    pub(crate) fn for_task(task: &Task) -> Self {
        Self {
            id: task.id,
            kind: task.kind.clone(),
            user_id: task.user_id.clone(),
            priority: task.priority,
            params: Arc::clone(&task.params),
            attempt: task.retry_count,
            cancellation: task.cancellation.clone(),
            queue: Weak::new(),
        }
    }

    /// Report progress for this attempt.
    ///
    /// See [`TaskQueue::update_progress`] for the semantics. Once the attempt
    /// has timed out, been cancelled or been finished by another report, the
    /// call is rejected and the task is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::StaleAttempt`] when a retry replaced this
    /// attempt and [`SchedulerError::TaskNotFound`] when the task is no
    /// longer processing or the scheduler is gone.
    pub fn report_progress(
        &self,
        progress: f64,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        let queue = self
            .queue
            .upgrade()
            .ok_or(SchedulerError::TaskNotFound(self.id))?;
        queue.update_progress_for_attempt(&self.id, self.attempt, progress, result, error)
    }

    /// String parameter lookup.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Whether the caller asked this task to stop.
    #[must_use]
    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation.is_requested()
    }
}

/// Abstraction for executing one attempt of a task.
///
/// The returned value becomes the task result. An error (or a panic) counts
/// as a failed attempt and goes through the retry policy.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_task_queue::core::{AppResult, TaskContext, TaskExecutor};
///
/// struct TtsExecutor { client: TtsClient }
///
/// #[async_trait]
/// impl TaskExecutor for TtsExecutor {
///     async fn execute(&self, ctx: TaskContext) -> AppResult<serde_json::Value> {
///         let text = ctx.param_str("text").unwrap_or_default();
///         let path = self.client.synthesize(text).await?;
///         Ok(serde_json::json!({ "audio_path": path }))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Run one attempt of the task described by `ctx`.
    async fn execute(&self, ctx: TaskContext) -> AppResult<Value>;
}

/// Executors keyed by task kind.
///
/// Used for submissions that do not carry their own executor and for tasks
/// re-enqueued from a checkpoint, whose executor could not be persisted.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for `kind`.
    pub fn register(&mut self, kind: TaskKind, executor: impl TaskExecutor) {
        self.executors.insert(kind.normalized(), Arc::new(executor));
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, kind: TaskKind, executor: impl TaskExecutor) -> Self {
        self.register(kind, executor);
        self
    }

    /// Executor for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: &TaskKind) -> Option<Arc<dyn TaskExecutor>> {
        match kind {
            TaskKind::Custom(_) => self.executors.get(&kind.clone().normalized()).cloned(),
            builtin => self.executors.get(builtin).cloned(),
        }
    }

    /// Number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}
