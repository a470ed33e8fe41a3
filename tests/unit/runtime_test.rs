//! Tests for tokio spawner utilities and the service lifecycle

use prometheus_task_queue::builders::build_service;
use prometheus_task_queue::config::{CheckpointBackendConfig, SchedulerConfig};
use prometheus_task_queue::core::ExecutorRegistry;
use prometheus_task_queue::runtime::tokio_spawner::TokioSpawner;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test]
async fn test_spawner_returns_output() {
    let spawner = TokioSpawner::current();
    let out = spawner.spawn(async { 6 * 7 }).await.unwrap();
    assert_eq!(out, 42);
}

#[test]
fn test_try_current_outside_runtime() {
    assert!(TokioSpawner::try_current().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_service_start_stop_is_idempotent() {
    let config = SchedulerConfig {
        checkpoint: CheckpointBackendConfig::InMemory,
        ..SchedulerConfig::default()
    };
    let service = build_service(&config, ExecutorRegistry::new(), TokioSpawner::current()).unwrap();

    assert!(service.start());
    assert!(!service.start());
    assert!(service.health().ok);

    service.stop().await;
    assert!(!service.is_running());
    assert!(!service.health().ok);
    service.stop().await;
}
