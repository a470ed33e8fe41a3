//! Builders to construct the task service from configuration.

use tracing::info;

use crate::config::{CheckpointBackendConfig, SchedulerConfig};
use crate::core::{CheckpointStore, ExecutorRegistry, SchedulerError, TaskQueue};
use crate::infra::checkpoint::{FileCheckpoint, InMemoryCheckpoint};
use crate::runtime::{TaskService, TokioSpawner};

/// Checkpoint backend selected by configuration.
#[must_use]
pub fn build_checkpoint_store(cfg: &CheckpointBackendConfig) -> Box<dyn CheckpointStore> {
    match cfg {
        CheckpointBackendConfig::InMemory => Box::new(InMemoryCheckpoint::new()),
        CheckpointBackendConfig::File { path } => Box::new(FileCheckpoint::new(path)),
    }
}

/// Build a [`TaskService`] from scheduler configuration, restoring any
/// checkpoint the configured backend holds. The service is not started.
///
/// # Errors
///
/// Returns [`SchedulerError::Config`] when `cfg` is invalid.
pub fn build_service(
    cfg: &SchedulerConfig,
    executors: ExecutorRegistry,
    spawner: TokioSpawner,
) -> Result<TaskService, SchedulerError> {
    let store = build_checkpoint_store(&cfg.checkpoint);
    let queue = TaskQueue::new(cfg, store, executors)?;
    info!(
        max_concurrent = cfg.max_concurrent_tasks,
        backend = ?cfg.checkpoint,
        "task service built"
    );
    Ok(TaskService::new(queue, spawner))
}
