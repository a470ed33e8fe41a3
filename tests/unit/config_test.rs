//! Tests for configuration validation

use std::path::PathBuf;

use prometheus_task_queue::config::{CheckpointBackendConfig, RetryOrdering, SchedulerConfig};
use prometheus_task_queue::util::serde::{ResourceKind, ResourceVector};

#[test]
fn test_default_config_validation() {
    let config = SchedulerConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.retry_ordering, RetryOrdering::PreserveCreatedAt);
    assert_eq!(
        config.checkpoint,
        CheckpointBackendConfig::File {
            path: PathBuf::from("tasks.json")
        }
    );
}

#[test]
fn test_config_invalid_concurrency() {
    let invalid = SchedulerConfig {
        max_concurrent_tasks: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_invalid_capacity() {
    let invalid = SchedulerConfig {
        capacity: ResourceVector::new().with(ResourceKind::Memory, -512.0),
        ..SchedulerConfig::default()
    };
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("memory"));
}

#[test]
fn test_config_invalid_sweep_interval() {
    let invalid = SchedulerConfig {
        timeout_sweep_interval_ms: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "max_concurrent_tasks": 4,
        "capacity": {"cpu": 8.0, "memory": 16384.0, "gpu": 2.0},
        "default_timeout_secs": 0,
        "retry_ordering": "requeue",
        "checkpoint": {"backend": "file", "path": "/var/lib/taskq/tasks.json"}
    }"#;

    let config = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(config.max_concurrent_tasks, 4);
    assert!((config.capacity.get(ResourceKind::Gpu) - 2.0).abs() < f64::EPSILON);
    assert!(config.task_defaults().timeout.is_zero());
    assert_eq!(config.default_max_retries, 3);
    assert_eq!(config.retry_ordering, RetryOrdering::Requeue);
    assert_eq!(
        config.checkpoint,
        CheckpointBackendConfig::File {
            path: PathBuf::from("/var/lib/taskq/tasks.json")
        }
    );
}

#[test]
fn test_config_from_json_in_memory_backend() {
    let config = SchedulerConfig::from_json_str(r#"{"checkpoint": {"backend": "in_memory"}}"#).unwrap();
    assert_eq!(config.checkpoint, CheckpointBackendConfig::InMemory);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{"max_concurrent_tasks": 0}"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}
