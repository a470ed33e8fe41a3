//! Service facade: owns the scheduler, starts and stops its background
//! loops, and forwards every operation to it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::{QueueStatus, SchedulerError, TaskQueue, TaskRecord, TaskSpec};
use crate::runtime::api::{Health, TaskSubmission};
use crate::runtime::TokioSpawner;
use crate::util::serde::TaskId;

/// How long [`TaskService::stop`] waits for the loops to exit.
const STOP_GRACE: Duration = Duration::from_secs(5);

struct RunningLoops {
    shutdown: watch::Sender<bool>,
    dispatch: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

/// Entry point for callers.
///
/// ```rust,ignore
/// let service = build_service(&SchedulerConfig::from_env()?, executors, TokioSpawner::current())?;
/// service.start();
/// let id = service.create_task(TaskSpec::new(TaskKind::AudioSynthesis, "alice"))?;
/// service.stop().await;
/// ```
pub struct TaskService {
    queue: Arc<TaskQueue>,
    spawner: TokioSpawner,
    loops: Mutex<Option<RunningLoops>>,
}

impl TaskService {
    /// Wrap a scheduler. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(queue: TaskQueue, spawner: TokioSpawner) -> Self {
        Self {
            queue: Arc::new(queue),
            spawner,
            loops: Mutex::new(None),
        }
    }

    /// The underlying scheduler.
    #[must_use]
    pub const fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    /// Launch the dispatch loop and the timeout sweep. Returns `false` when
    /// they are already running.
    pub fn start(&self) -> bool {
        let mut loops = self.loops.lock();
        if loops.is_some() {
            return false;
        }
        let (shutdown, rx) = watch::channel(false);
        let dispatch = self.spawner.spawn(
            Arc::clone(&self.queue).run_dispatch_loop(self.spawner.clone(), rx.clone()),
        );
        let sweep = self
            .spawner
            .spawn(Arc::clone(&self.queue).run_timeout_sweep(rx));
        *loops = Some(RunningLoops {
            shutdown,
            dispatch,
            sweep,
        });
        info!("task service started");
        true
    }

    /// Whether the background loops are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.loops.lock().is_some()
    }

    /// Signal both loops and wait briefly for them to exit. Attempts already
    /// running are not awaited; their outcomes are still recorded if they
    /// finish while the process lives.
    pub async fn stop(&self) {
        let running = self.loops.lock().take();
        let Some(RunningLoops {
            shutdown,
            mut dispatch,
            mut sweep,
        }) = running
        else {
            return;
        };
        shutdown.send(true).ok();

        let joined = tokio::time::timeout(STOP_GRACE, async {
            (&mut dispatch).await.ok();
            (&mut sweep).await.ok();
        })
        .await;
        if joined.is_err() {
            warn!(grace = ?STOP_GRACE, "scheduler loops did not stop in time, aborting");
            dispatch.abort();
            sweep.abort();
        }
        info!("task service stopped");
    }

    /// Submit a task. See [`TaskQueue::submit`].
    ///
    /// # Errors
    ///
    /// Propagates submission rejections.
    pub fn create_task(&self, spec: TaskSpec) -> Result<TaskId, SchedulerError> {
        self.queue.submit(spec)
    }

    /// Submit a transport payload; the executor comes from the registry.
    ///
    /// # Errors
    ///
    /// Propagates validation failures and submission rejections.
    pub fn submit_request(&self, request: TaskSubmission) -> Result<TaskId, SchedulerError> {
        self.queue.submit(request.into_spec()?)
    }

    /// Cancel a queued task. See [`TaskQueue::cancel`].
    ///
    /// # Errors
    ///
    /// Fails for processing, terminal or unknown tasks.
    pub fn cancel(&self, id: &TaskId) -> Result<(), SchedulerError> {
        self.queue.cancel(id)
    }

    /// Raise the cooperative cancellation flag of a task.
    ///
    /// # Errors
    ///
    /// Fails for terminal or unknown tasks.
    pub fn request_cancellation(&self, id: &TaskId) -> Result<(), SchedulerError> {
        self.queue.request_cancellation(id)
    }

    /// Current record of a task.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.queue.get(id)
    }

    /// Every task of a user.
    #[must_use]
    pub fn list_for_user(&self, user_id: &str) -> Vec<TaskRecord> {
        self.queue.list_for_user(user_id)
    }

    /// Aggregate counts.
    #[must_use]
    pub fn queue_status(&self) -> QueueStatus {
        self.queue.queue_status()
    }

    /// Report progress. See [`TaskQueue::update_progress`].
    ///
    /// # Errors
    ///
    /// Fails when the task is not processing.
    pub fn update_progress(
        &self,
        id: &TaskId,
        progress: f64,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.queue.update_progress(id, progress, result, error)
    }

    /// Report progress for one attempt. See
    /// [`TaskQueue::update_progress_for_attempt`].
    ///
    /// # Errors
    ///
    /// Fails when the task is not processing or `attempt` is no longer current.
    pub fn update_progress_for_attempt(
        &self,
        id: &TaskId,
        attempt: u32,
        progress: f64,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.queue
            .update_progress_for_attempt(id, attempt, progress, result, error)
    }

    /// Change the concurrency cap.
    ///
    /// # Errors
    ///
    /// Fails for zero.
    pub fn set_concurrency_cap(&self, cap: usize) -> Result<(), SchedulerError> {
        self.queue.set_concurrency_cap(cap)
    }

    /// Liveness and queue depth.
    #[must_use]
    pub fn health(&self) -> Health {
        Health::from_status(self.is_running(), &self.queue.queue_status())
    }
}

impl Drop for TaskService {
    fn drop(&mut self) {
        if let Some(loops) = self.loops.get_mut().take() {
            loops.shutdown.send(true).ok();
        }
    }
}
