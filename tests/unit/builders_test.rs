//! Tests for builder modules

use prometheus_task_queue::builders::{build_checkpoint_store, build_service};
use prometheus_task_queue::config::{CheckpointBackendConfig, SchedulerConfig};
use prometheus_task_queue::core::{CheckpointStore, ExecutorRegistry, TaskSpec, TaskStatus};
use prometheus_task_queue::runtime::TokioSpawner;
use prometheus_task_queue::util::serde::TaskKind;

#[test]
fn test_in_memory_store_starts_empty() {
    let store = build_checkpoint_store(&CheckpointBackendConfig::InMemory);
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_build_service_with_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/tasks.json");
    let config = SchedulerConfig {
        checkpoint: CheckpointBackendConfig::File { path: path.clone() },
        ..SchedulerConfig::default()
    };

    let service = build_service(&config, ExecutorRegistry::new(), TokioSpawner::current()).unwrap();
    assert!(!service.is_running());
    let id = service
        .create_task(TaskSpec::new(TaskKind::FileCleanup, "alice"))
        .unwrap();
    assert_eq!(service.get(&id).unwrap().status, TaskStatus::Pending);
    assert!(path.exists());
}

#[tokio::test]
async fn test_build_service_rejects_invalid_config() {
    let config = SchedulerConfig {
        max_concurrent_tasks: 0,
        checkpoint: CheckpointBackendConfig::InMemory,
        ..SchedulerConfig::default()
    };
    assert!(build_service(&config, ExecutorRegistry::new(), TokioSpawner::current()).is_err());
}
