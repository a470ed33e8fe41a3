//! Scheduler core: admission queue, in-flight and completed tables, resource
//! ledger, the dispatch loop and the timeout sweep.
//!
//! All tables and the ledger sit behind one `parking_lot::Mutex`. Every
//! operation holds it only for in-memory bookkeeping; work functions run on
//! spawned workers and checkpoint I/O happens after the lock is released.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::config::{RetryOrdering, SchedulerConfig};
use crate::core::{
    Checkpoint, CheckpointStore, ExecutorRegistry, ResourceLedger, SchedulerError, Task,
    TaskContext, TaskDefaults, TaskExecutor, TaskRecord, TaskSpec, TaskStatus,
};
use crate::infra::queue::AdmissionQueue;
use crate::runtime::TokioSpawner;
use crate::util::clock::{elapsed_between, now};
use crate::util::serde::{ResourceVector, TaskId, TaskKind};

const RESTART_INTERRUPTED: &str = "task interrupted by scheduler restart";

/// Source of truth for which users may submit work.
pub trait UserDirectory: Send + Sync {
    /// Whether `user_id` exists.
    fn contains(&self, user_id: &str) -> bool;
}

impl UserDirectory for HashSet<String> {
    fn contains(&self, user_id: &str) -> bool {
        HashSet::contains(self, user_id)
    }
}

/// Per-status counters for one task kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Queued.
    pub pending: usize,
    /// Running.
    pub processing: usize,
    /// Finished successfully.
    pub completed: usize,
    /// Failed.
    pub failed: usize,
    /// Cancelled.
    pub cancelled: usize,
}

impl StatusCounts {
    fn bump(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Processing => self.processing += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Aggregate view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Tasks waiting in the admission queue.
    pub pending_count: usize,
    /// Tasks currently processing.
    pub active_count: usize,
    /// Tasks in a terminal status.
    pub completed_count: usize,
    /// Current concurrency cap.
    pub max_concurrent_tasks: usize,
    /// Breakdown by kind name, then by status. Built-in kinds are always present.
    pub type_counts: BTreeMap<String, StatusCounts>,
    /// Ledger capacity.
    pub resource_capacity: ResourceVector,
    /// Resources reserved by processing tasks.
    pub resource_usage: ResourceVector,
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone)]
enum FailureCause {
    Error(String),
    Timeout(Duration),
}

impl FailureCause {
    fn describe(&self) -> String {
        match self {
            Self::Error(msg) => msg.clone(),
            Self::Timeout(limit) => format!("task timed out after {limit:?}"),
        }
    }
}

/// Result of a finished attempt as reported by a worker.
#[derive(Debug)]
enum AttemptOutcome {
    Succeeded(Option<Value>),
    Failed(FailureCause),
}

/// A task that was just admitted and must be handed to a worker.
pub(crate) struct Admission {
    id: TaskId,
    attempt: u32,
    executor: Option<Arc<dyn TaskExecutor>>,
    ctx: TaskContext,
}

/// What one dispatch step did.
pub(crate) enum DispatchOutcome {
    /// A task was admitted.
    Started(Admission),
    /// Queue empty.
    Idle,
    /// Concurrency cap reached.
    AtCapacity,
    /// Head of the queue does not fit the free resources.
    Starved,
}

struct SchedulerState {
    queue: AdmissionQueue,
    in_flight: HashMap<TaskId, Task>,
    completed: HashMap<TaskId, Task>,
    ledger: ResourceLedger,
    max_concurrent: usize,
    by_user: HashMap<String, HashSet<TaskId>>,
    generation: u64,
}

impl SchedulerState {
    fn lookup(&self, id: &TaskId) -> Option<&Task> {
        self.in_flight
            .get(id)
            .or_else(|| self.completed.get(id))
            .or_else(|| self.queue.get(id))
    }

    fn index_user(&mut self, task: &Task) {
        self.by_user
            .entry(task.user_id.clone())
            .or_default()
            .insert(task.id);
    }

    /// Move an in-flight task to the completed table, releasing its resources.
    fn finalize<F>(&mut self, id: &TaskId, apply: F)
    where
        F: FnOnce(&mut Task),
    {
        if let Some(mut task) = self.in_flight.remove(id) {
            self.ledger.release(&task.resources);
            apply(&mut task);
            self.completed.insert(*id, task);
        }
    }

    fn snapshot(&mut self) -> (u64, Checkpoint) {
        self.generation += 1;
        let in_flight = self
            .queue
            .iter()
            .chain(self.in_flight.values())
            .map(|t| (t.id, t.to_record()))
            .collect();
        let completed = self
            .completed
            .values()
            .map(|t| (t.id, t.to_record()))
            .collect();
        (self.generation, Checkpoint { in_flight, completed })
    }
}

struct CheckpointWriter {
    store: Box<dyn CheckpointStore>,
    last_written: u64,
}

/// The scheduler core.
///
/// Constructed explicitly and shared through `Arc`; [`crate::runtime::TaskService`]
/// is the intended entry point for callers.
pub struct TaskQueue {
    state: Mutex<SchedulerState>,
    writer: Mutex<CheckpointWriter>,
    executors: ExecutorRegistry,
    users: Option<Arc<dyn UserDirectory>>,
    defaults: TaskDefaults,
    retry_ordering: RetryOrdering,
    sweep_interval: Duration,
    dispatch_idle: Duration,
    resource_backoff: Duration,
    wake: Notify,
}

impl TaskQueue {
    /// Build the scheduler and restore whatever `store` holds.
    ///
    /// Completed records come back verbatim; pending records are re-queued
    /// with the executor registered for their kind; records caught mid-run
    /// are failed as interrupted. A checkpoint that cannot be read is
    /// logged and the scheduler starts empty; keeping the unreadable copy
    /// is up to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] when `config` is invalid.
    pub fn new(
        config: &SchedulerConfig,
        store: Box<dyn CheckpointStore>,
        executors: ExecutorRegistry,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::Config)?;

        let queue = Self {
            state: Mutex::new(SchedulerState {
                queue: AdmissionQueue::new(),
                in_flight: HashMap::new(),
                completed: HashMap::new(),
                ledger: ResourceLedger::new(config.capacity.clone()),
                max_concurrent: config.max_concurrent_tasks,
                by_user: HashMap::new(),
                generation: 0,
            }),
            writer: Mutex::new(CheckpointWriter {
                store,
                last_written: 0,
            }),
            executors,
            users: None,
            defaults: config.task_defaults(),
            retry_ordering: config.retry_ordering,
            sweep_interval: config.sweep_interval(),
            dispatch_idle: config.dispatch_idle(),
            resource_backoff: config.resource_backoff(),
            wake: Notify::new(),
        };
        queue.restore();
        Ok(queue)
    }

    /// Reject submissions from users unknown to `users`.
    #[must_use]
    pub fn with_user_directory(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    fn restore(&self) {
        let loaded = self.writer.lock().store.load();
        let checkpoint = match loaded {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "failed to load checkpoint, starting empty");
                return;
            }
        };

        let restart = now();
        let snapshot = {
            let mut st = self.state.lock();
            for record in checkpoint.completed.into_values() {
                let task = Task::from_record(record, self.defaults, None);
                st.index_user(&task);
                st.completed.insert(task.id, task);
            }

            let (mut requeued, mut interrupted) = (0usize, 0usize);
            for record in checkpoint.in_flight.into_values() {
                let id = record.task_id;
                if st.completed.contains_key(&id) {
                    continue;
                }
                let executor = self.executors.get(&record.task_type);
                let mut task = Task::from_record(record, self.defaults, executor);
                st.index_user(&task);

                if task.status != TaskStatus::Pending {
                    task.fail(RESTART_INTERRUPTED.into(), restart);
                    interrupted += 1;
                    warn!(task_id = %id, "in-flight task interrupted by restart, marked failed");
                    st.completed.insert(id, task);
                    continue;
                }
                if let Err(e) = st.ledger.check_fits_capacity(&task.resources) {
                    task.fail(e.to_string(), restart);
                    warn!(task_id = %id, error = %e, "restored task no longer fits capacity");
                    st.completed.insert(id, task);
                    continue;
                }
                task.started_at = None;
                task.completed_at = None;
                task.progress = 0.0;
                requeued += 1;
                st.queue.push(task);
            }
            info!(
                completed = st.completed.len(),
                requeued,
                interrupted,
                "restored scheduler state from checkpoint"
            );
            st.snapshot()
        };
        self.persist(snapshot);
    }

    fn persist(&self, (generation, checkpoint): (u64, Checkpoint)) {
        let mut writer = self.writer.lock();
        if generation <= writer.last_written {
            debug!(generation, "skipping stale checkpoint");
            return;
        }
        match writer.store.save(&checkpoint) {
            Ok(()) => writer.last_written = generation,
            Err(e) => error!(error = %e, generation, "failed to write checkpoint"),
        }
    }

    /// Validate and enqueue a task. Returns its identifier.
    ///
    /// A spec without an executor takes the one registered for its kind; a
    /// task with neither completes as soon as it is admitted.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Validation`], [`SchedulerError::UnknownUser`]
    /// or [`SchedulerError::ExceedsCapacity`]; rejected tasks are never queued.
    pub fn submit(&self, mut spec: TaskSpec) -> Result<TaskId, SchedulerError> {
        spec.validate()?;
        if let Some(users) = &self.users {
            if !users.contains(&spec.user_id) {
                warn!(user = %spec.user_id, "rejecting task from unknown user");
                return Err(SchedulerError::UnknownUser(spec.user_id));
            }
        }
        if spec.executor.is_none() {
            spec.executor = self.executors.get(&spec.kind);
        }

        let task = Task::from_spec(spec, self.defaults, now());
        let id = task.id;
        let snapshot = {
            let mut st = self.state.lock();
            st.ledger.check_fits_capacity(&task.resources)?;
            info!(
                task_id = %id,
                kind = %task.kind,
                user = %task.user_id,
                priority = %task.priority,
                "task queued"
            );
            st.index_user(&task);
            st.queue.push(task);
            st.snapshot()
        };
        self.persist(snapshot);
        self.wake.notify_one();
        Ok(id)
    }

    /// Cancel a queued task.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotCancellable`] when the task is processing
    /// or already terminal (the task is left untouched), and
    /// [`SchedulerError::TaskNotFound`] for an unknown id.
    pub fn cancel(&self, id: &TaskId) -> Result<(), SchedulerError> {
        let snapshot = {
            let mut st = self.state.lock();
            if let Some(mut task) = st.queue.remove(id) {
                task.cancel(now());
                info!(task_id = %id, "cancelled queued task");
                st.completed.insert(*id, task);
                st.snapshot()
            } else if let Some(task) = st.in_flight.get(id).or_else(|| st.completed.get(id)) {
                warn!(task_id = %id, status = %task.status, "refusing to cancel task");
                return Err(SchedulerError::NotCancellable {
                    id: *id,
                    status: task.status,
                });
            } else {
                warn!(task_id = %id, "cancel requested for unknown task");
                return Err(SchedulerError::TaskNotFound(*id));
            }
        };
        self.persist(snapshot);
        Ok(())
    }

    /// Raise the cooperative cancellation flag of a queued or processing
    /// task. The work function decides whether and when to stop.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotCancellable`] for a terminal task and
    /// [`SchedulerError::TaskNotFound`] for an unknown id.
    pub fn request_cancellation(&self, id: &TaskId) -> Result<(), SchedulerError> {
        let st = self.state.lock();
        let task = st.lookup(id).ok_or(SchedulerError::TaskNotFound(*id))?;
        if task.status.is_terminal() {
            return Err(SchedulerError::NotCancellable {
                id: *id,
                status: task.status,
            });
        }
        task.cancellation.request();
        info!(task_id = %id, status = %task.status, "cancellation requested");
        Ok(())
    }

    /// Current projection of a task, wherever it is.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.state.lock().lookup(id).map(Task::to_record)
    }

    /// All tasks of a user in any status, oldest first.
    #[must_use]
    pub fn list_for_user(&self, user_id: &str) -> Vec<TaskRecord> {
        let st = self.state.lock();
        let Some(ids) = st.by_user.get(user_id) else {
            return Vec::new();
        };
        let mut records: Vec<TaskRecord> = ids
            .iter()
            .filter_map(|id| st.lookup(id))
            .map(Task::to_record)
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        records
    }

    /// Aggregate counts.
    #[must_use]
    pub fn queue_status(&self) -> QueueStatus {
        let st = self.state.lock();
        let mut type_counts: BTreeMap<String, StatusCounts> = TaskKind::BUILTIN
            .iter()
            .map(|kind| (kind.to_string(), StatusCounts::default()))
            .collect();
        for task in st
            .queue
            .iter()
            .chain(st.in_flight.values())
            .chain(st.completed.values())
        {
            type_counts
                .entry(task.kind.to_string())
                .or_default()
                .bump(task.status);
        }
        QueueStatus {
            pending_count: st.queue.len(),
            active_count: st.in_flight.len(),
            completed_count: st.completed.len(),
            max_concurrent_tasks: st.max_concurrent,
            type_counts,
            resource_capacity: st.ledger.capacity().clone(),
            resource_usage: st.ledger.usage().clone(),
        }
    }

    /// Report progress for a processing task.
    ///
    /// Progress is clamped to `[0, 100]` and never moves backwards. Reaching
    /// 100 completes the task with `result`; supplying `error` fails it
    /// without retry. Both release its resources.
    ///
    /// The report applies to whichever attempt is running. Work functions
    /// should report through [`TaskContext::report_progress`] so a
    /// superseded attempt cannot touch its retry.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskNotFound`] when the task is not processing.
    pub fn update_progress(
        &self,
        id: &TaskId,
        progress: f64,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.apply_progress(id, None, progress, result, error)
    }

    /// Report progress on behalf of one attempt of a task.
    ///
    /// Same semantics as [`TaskQueue::update_progress`], but the report is
    /// only accepted while `attempt` is the attempt being processed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::TaskNotFound`] when the task is not
    /// processing and [`SchedulerError::StaleAttempt`] when a later attempt
    /// has replaced `attempt`.
    pub fn update_progress_for_attempt(
        &self,
        id: &TaskId,
        attempt: u32,
        progress: f64,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.apply_progress(id, Some(attempt), progress, result, error)
    }

    fn apply_progress(
        &self,
        id: &TaskId,
        attempt: Option<u32>,
        progress: f64,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        let snapshot = {
            let mut st = self.state.lock();
            let Some(task) = st
                .in_flight
                .get_mut(id)
                .filter(|t| t.status == TaskStatus::Processing)
            else {
                warn!(task_id = %id, "progress update for task that is not processing");
                return Err(SchedulerError::TaskNotFound(*id));
            };
            if let Some(attempt) = attempt.filter(|a| *a != task.retry_count) {
                debug!(
                    task_id = %id,
                    attempt,
                    current = task.retry_count,
                    "discarding progress of superseded attempt"
                );
                return Err(SchedulerError::StaleAttempt { id: *id, attempt });
            }
            let stored = task.advance_progress(progress);
            debug!(task_id = %id, progress = stored, "progress updated");

            let at = now();
            if progress >= 100.0 {
                st.finalize(id, |t| t.complete(result, at));
                info!(task_id = %id, "task completed");
            } else if let Some(error) = error {
                warn!(task_id = %id, error = %error, "task failed by work function report");
                st.finalize(id, |t| t.fail(error, at));
            }
            st.snapshot()
        };
        self.persist(snapshot);
        self.wake.notify_one();
        Ok(())
    }

    /// Change the concurrency cap.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConcurrency`] for zero.
    pub fn set_concurrency_cap(&self, cap: usize) -> Result<(), SchedulerError> {
        if cap < 1 {
            return Err(SchedulerError::InvalidConcurrency(cap));
        }
        self.state.lock().max_concurrent = cap;
        info!(cap, "concurrency cap updated");
        self.wake.notify_one();
        Ok(())
    }

    /// Admit the head of the queue if a slot and its resources are free.
    pub(crate) fn try_dispatch(&self) -> DispatchOutcome {
        let (admission, snapshot) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if st.in_flight.len() >= st.max_concurrent {
                return DispatchOutcome::AtCapacity;
            }
            let Some(head) = st.queue.peek() else {
                return DispatchOutcome::Idle;
            };
            if !st.ledger.try_reserve(&head.resources) {
                debug!(task_id = %head.id, "insufficient resources, head of queue waits");
                return DispatchOutcome::Starved;
            }
            let Some(mut task) = st.queue.pop() else {
                return DispatchOutcome::Idle;
            };

            task.mark_processing(now());
            let admission = Admission {
                id: task.id,
                attempt: task.retry_count,
                executor: task.executor.clone(),
                ctx: TaskContext::for_task(&task),
            };
            info!(
                task_id = %task.id,
                kind = %task.kind,
                attempt = task.retry_count,
                "task admitted"
            );
            st.in_flight.insert(task.id, task);
            (admission, st.snapshot())
        };
        self.persist(snapshot);
        DispatchOutcome::Started(admission)
    }

    /// Run one attempt on the current worker and record its outcome.
    pub(crate) async fn run_attempt(self: Arc<Self>, admission: Admission) {
        let Admission {
            id,
            attempt,
            executor,
            mut ctx,
        } = admission;
        ctx.queue = Arc::downgrade(&self);

        let outcome = match executor {
            None => AttemptOutcome::Succeeded(None),
            Some(executor) => match AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await {
                Ok(Ok(value)) => AttemptOutcome::Succeeded(Some(value)),
                Ok(Err(e)) => AttemptOutcome::Failed(FailureCause::Error(format!("{e:#}"))),
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    AttemptOutcome::Failed(FailureCause::Error(format!("work function panicked: {msg}")))
                }
            },
        };
        self.finish_attempt(&id, attempt, outcome);
    }

    fn finish_attempt(&self, id: &TaskId, attempt: u32, outcome: AttemptOutcome) {
        let snapshot = {
            let mut st = self.state.lock();
            let current = st
                .in_flight
                .get(id)
                .is_some_and(|t| t.retry_count == attempt && t.status == TaskStatus::Processing);
            if !current {
                debug!(task_id = %id, attempt, "discarding outcome of superseded attempt");
                return;
            }
            match outcome {
                AttemptOutcome::Succeeded(result) => {
                    let at = now();
                    st.finalize(id, |t| t.complete(result, at));
                    info!(task_id = %id, attempt, "task completed");
                }
                AttemptOutcome::Failed(cause) => self.retry_or_fail(&mut st, id, &cause),
            }
            st.snapshot()
        };
        self.persist(snapshot);
        self.wake.notify_one();
    }

    /// Send a failed in-flight task back to the queue, or fail it for good
    /// once retries are exhausted. Resources are released either way.
    fn retry_or_fail(&self, st: &mut SchedulerState, id: &TaskId, cause: &FailureCause) {
        let Some(mut task) = st.in_flight.remove(id) else {
            return;
        };
        st.ledger.release(&task.resources);
        if matches!(cause, FailureCause::Timeout(_)) {
            // abandoned attempt keeps running; ask it to stop
            task.cancellation.request();
        }

        if task.can_retry() {
            let ordered_at = match self.retry_ordering {
                RetryOrdering::PreserveCreatedAt => task.created_at,
                RetryOrdering::Requeue => now(),
            };
            task.reset_for_retry(ordered_at);
            warn!(
                task_id = %id,
                retry = task.retry_count,
                max_retries = task.max_retries,
                cause = %cause.describe(),
                "task attempt failed, retrying"
            );
            st.queue.push(task);
        } else {
            let msg = format!(
                "{} (retried {} times)",
                cause.describe(),
                task.retry_count
            );
            error!(task_id = %id, error = %msg, "task failed, retries exhausted");
            task.fail(msg, now());
            st.completed.insert(*id, task);
        }
    }

    /// Fail or retry every processing task that outlived its timeout.
    /// Returns how many timed out.
    pub fn sweep_timeouts(&self) -> usize {
        let at = now();
        let (expired, snapshot) = {
            let mut st = self.state.lock();
            let expired: Vec<(TaskId, Duration)> = st
                .in_flight
                .values()
                .filter(|t| t.status == TaskStatus::Processing && !t.timeout.is_zero())
                .filter(|t| {
                    t.started_at
                        .is_some_and(|started| elapsed_between(started, at) > t.timeout)
                })
                .map(|t| (t.id, t.timeout))
                .collect();
            if expired.is_empty() {
                return 0;
            }
            for (id, limit) in &expired {
                self.retry_or_fail(&mut st, id, &FailureCause::Timeout(*limit));
            }
            (expired.len(), st.snapshot())
        };
        self.persist(snapshot);
        self.wake.notify_one();
        expired
    }

    /// Admit tasks until told to stop. Each admitted attempt runs on its
    /// own spawned worker.
    pub async fn run_dispatch_loop(
        self: Arc<Self>,
        spawner: TokioSpawner,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("dispatch loop started");
        while !*shutdown.borrow() {
            let wait = match self.try_dispatch() {
                DispatchOutcome::Started(admission) => {
                    let this = Arc::clone(&self);
                    spawner.spawn(async move { this.run_attempt(admission).await });
                    continue;
                }
                DispatchOutcome::Idle | DispatchOutcome::AtCapacity => self.dispatch_idle,
                DispatchOutcome::Starved => self.resource_backoff,
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.wake.notified() => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
        info!("dispatch loop stopped");
    }

    /// Sweep for timed-out tasks on a fixed interval until told to stop.
    pub async fn run_timeout_sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.sweep_interval, "timeout sweep started");
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.sweep_timeouts();
                    if expired > 0 {
                        debug!(expired, "timeout sweep finished");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("timeout sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::checkpoint::InMemoryCheckpoint;
    use crate::util::serde::{Priority, ResourceKind};

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_tasks: 1,
            capacity: ResourceVector::new()
                .with(ResourceKind::Cpu, 2.0)
                .with(ResourceKind::Memory, 1024.0)
                .with(ResourceKind::Gpu, 1.0),
            default_max_retries: 2,
            ..SchedulerConfig::default()
        }
    }

    fn scheduler(store: InMemoryCheckpoint) -> TaskQueue {
        TaskQueue::new(&config(), Box::new(store), ExecutorRegistry::new()).unwrap()
    }

    fn spec(priority: Priority) -> TaskSpec {
        TaskSpec::new(TaskKind::AudioSynthesis, "alice").with_priority(priority)
    }

    fn admit(queue: &TaskQueue) -> Admission {
        match queue.try_dispatch() {
            DispatchOutcome::Started(admission) => admission,
            _ => panic!("expected an admission"),
        }
    }

    #[test]
    fn test_submit_writes_checkpoint_and_is_queryable() {
        let store = InMemoryCheckpoint::new();
        let queue = scheduler(store.clone());
        let id = queue.submit(spec(Priority::Normal)).unwrap();

        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.in_flight.contains_key(&id));
        assert_eq!(queue.queue_status().pending_count, 1);
    }

    #[test]
    fn test_dispatch_respects_cap_and_resources() {
        let queue = scheduler(InMemoryCheckpoint::new());
        queue.set_concurrency_cap(3).unwrap();
        let big = ResourceVector::new().with(ResourceKind::Gpu, 1.0);
        queue.submit(spec(Priority::High).with_resources(big.clone())).unwrap();
        queue.submit(spec(Priority::Normal).with_resources(big)).unwrap();

        let first = admit(&queue);
        assert!(matches!(queue.try_dispatch(), DispatchOutcome::Starved));
        assert_eq!(queue.get(&first.id).unwrap().status, TaskStatus::Processing);

        queue.finish_attempt(&first.id, first.attempt, AttemptOutcome::Succeeded(None));
        let second = admit(&queue);
        assert_ne!(first.id, second.id);

        queue.set_concurrency_cap(1).unwrap();
        queue.submit(spec(Priority::Urgent)).unwrap();
        assert!(matches!(queue.try_dispatch(), DispatchOutcome::AtCapacity));
    }

    #[test]
    fn test_failure_retries_then_fails() {
        let queue = scheduler(InMemoryCheckpoint::new());
        let id = queue.submit(spec(Priority::Normal)).unwrap();

        for expected_retry in 1..=2 {
            let a = admit(&queue);
            queue.finish_attempt(&id, a.attempt, AttemptOutcome::Failed(FailureCause::Error("boom".into())));
            let record = queue.get(&id).unwrap();
            assert_eq!(record.status, TaskStatus::Pending);
            assert_eq!(record.retry_count, expected_retry);
            assert!(record.started_at.is_none());
        }

        let last = admit(&queue);
        queue.finish_attempt(&id, last.attempt, AttemptOutcome::Failed(FailureCause::Error("boom".into())));
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("boom"));
        assert!(record.completed_at.is_some());
        assert!(matches!(queue.try_dispatch(), DispatchOutcome::Idle));
        assert!(queue.queue_status().resource_usage.get(ResourceKind::Cpu).abs() < 1e-9);
    }

    #[test]
    fn test_stale_attempt_outcome_is_discarded() {
        let queue = scheduler(InMemoryCheckpoint::new());
        let id = queue
            .submit(spec(Priority::Normal).with_timeout(Duration::from_millis(1)))
            .unwrap();
        let stale = admit(&queue);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(queue.sweep_timeouts(), 1);
        assert!(stale.ctx.is_cancellation_requested());

        let fresh = admit(&queue);
        assert_eq!(fresh.attempt, 1);
        queue.finish_attempt(&id, stale.attempt, AttemptOutcome::Succeeded(None));
        assert_eq!(queue.get(&id).unwrap().status, TaskStatus::Processing);

        queue.finish_attempt(&id, fresh.attempt, AttemptOutcome::Succeeded(Some(Value::Bool(true))));
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(Value::Bool(true)));
    }

    #[test]
    fn test_stale_attempt_progress_is_rejected() {
        let queue = scheduler(InMemoryCheckpoint::new());
        let id = queue
            .submit(spec(Priority::Normal).with_timeout(Duration::from_millis(1)))
            .unwrap();
        let stale = admit(&queue);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(queue.sweep_timeouts(), 1);

        // retry is queued: no attempt is processing
        assert!(matches!(
            queue.update_progress_for_attempt(&id, stale.attempt, 100.0, None, None),
            Err(SchedulerError::TaskNotFound(_))
        ));

        let fresh = admit(&queue);
        assert!(matches!(
            queue.update_progress_for_attempt(
                &id,
                stale.attempt,
                100.0,
                Some(Value::from("stale attempt 0")),
                None
            ),
            Err(SchedulerError::StaleAttempt { attempt: 0, .. })
        ));
        assert!(matches!(
            queue.update_progress_for_attempt(&id, stale.attempt, 10.0, None, Some("late".into())),
            Err(SchedulerError::StaleAttempt { .. })
        ));
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Processing);
        assert!(record.result.is_none());
        assert!(record.progress.abs() < f64::EPSILON);

        queue
            .update_progress_for_attempt(&id, fresh.attempt, 100.0, Some(Value::from("attempt 1")), None)
            .unwrap();
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.result, Some(Value::from("attempt 1")));
    }

    #[test]
    fn test_cancel_rules() {
        let queue = scheduler(InMemoryCheckpoint::new());
        let running = queue.submit(spec(Priority::High)).unwrap();
        let waiting = queue.submit(spec(Priority::Low)).unwrap();
        admit(&queue);

        assert!(matches!(
            queue.cancel(&running),
            Err(SchedulerError::NotCancellable { status: TaskStatus::Processing, .. })
        ));
        assert_eq!(queue.get(&running).unwrap().status, TaskStatus::Processing);

        queue.cancel(&waiting).unwrap();
        assert_eq!(queue.get(&waiting).unwrap().status, TaskStatus::Cancelled);
        assert!(queue.cancel(&waiting).is_err());
        assert!(matches!(
            queue.cancel(&TaskId::new_v4()),
            Err(SchedulerError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_update_progress_paths() {
        let queue = scheduler(InMemoryCheckpoint::new());
        let id = queue.submit(spec(Priority::Normal)).unwrap();
        assert!(queue.update_progress(&id, 10.0, None, None).is_err());

        admit(&queue);
        queue.update_progress(&id, 50.0, None, None).unwrap();
        queue.update_progress(&id, 20.0, None, None).unwrap();
        assert!((queue.get(&id).unwrap().progress - 50.0).abs() < f64::EPSILON);

        queue
            .update_progress(&id, 30.0, None, Some("disk full".into()))
            .unwrap();
        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("disk full"));
        assert_eq!(record.retry_count, 0);
    }

    #[test]
    fn test_validation_rejections() {
        let queue = scheduler(InMemoryCheckpoint::new()).with_user_directory(Arc::new(
            ["alice".to_string()].into_iter().collect::<HashSet<_>>(),
        ));
        assert!(matches!(
            queue.submit(TaskSpec::new(TaskKind::FileCleanup, "mallory")),
            Err(SchedulerError::UnknownUser(_))
        ));
        let huge = ResourceVector::new().with(ResourceKind::Memory, 4096.0);
        assert!(matches!(
            queue.submit(spec(Priority::Normal).with_resources(huge)),
            Err(SchedulerError::ExceedsCapacity { .. })
        ));
        assert!(queue.set_concurrency_cap(0).is_err());
        assert_eq!(queue.queue_status().pending_count, 0);
    }

    #[test]
    fn test_queue_status_breakdown() {
        let queue = scheduler(InMemoryCheckpoint::new());
        queue.submit(spec(Priority::High)).unwrap();
        let cancelled = queue.submit(TaskSpec::new(TaskKind::FileCleanup, "bob")).unwrap();
        queue.submit(TaskSpec::new(TaskKind::Custom("ocr".into()), "bob")).unwrap();
        let spelled = queue
            .submit(TaskSpec::new(TaskKind::Custom("video_generation".into()), "bob"))
            .unwrap();
        assert_eq!(queue.get(&spelled).unwrap().task_type, TaskKind::VideoGeneration);
        queue.cancel(&spelled).unwrap();
        queue.cancel(&cancelled).unwrap();
        admit(&queue);

        let status = queue.queue_status();
        assert_eq!(status.active_count, 1);
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.completed_count, 2);
        assert_eq!(status.type_counts["audio_synthesis"].processing, 1);
        assert_eq!(status.type_counts["file_cleanup"].cancelled, 1);
        assert_eq!(status.type_counts["ocr"].pending, 1);
        assert_eq!(status.type_counts["video_generation"].cancelled, 1);
        assert_eq!(status.type_counts["model_training"], StatusCounts::default());
    }

    #[test]
    fn test_list_for_user_spans_all_tables() {
        let queue = scheduler(InMemoryCheckpoint::new());
        let a = queue.submit(spec(Priority::High)).unwrap();
        let b = queue.submit(spec(Priority::Low)).unwrap();
        let c = queue.submit(spec(Priority::Low)).unwrap();
        queue.submit(TaskSpec::new(TaskKind::FileCleanup, "bob")).unwrap();
        admit(&queue);
        queue.cancel(&c).unwrap();

        let records = queue.list_for_user("alice");
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        for id in [a, b, c] {
            assert!(records.iter().any(|r| r.task_id == id));
        }
        assert!(queue.list_for_user("nobody").is_empty());
    }
}
