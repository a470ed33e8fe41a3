//! Tests for utility functions

use std::time::Duration;

use prometheus_task_queue::util::{
    elapsed_between, init_tracing, now, Priority, ResourceKind, ResourceVector, TaskId, TaskKind,
};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Urgent > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_resource_vector() {
    let vector = ResourceVector::new()
        .with(ResourceKind::Cpu, 2.0)
        .with(ResourceKind::Gpu, 0.5);
    assert!((vector.get(ResourceKind::Cpu) - 2.0).abs() < f64::EPSILON);
    assert!(vector.get(ResourceKind::Memory).abs() < f64::EPSILON);
    assert!(vector.invalid_entry().is_none());

    let json = serde_json::to_string(&vector).unwrap();
    assert_eq!(json, r#"{"cpu":2.0,"gpu":0.5}"#);
}

#[test]
fn test_task_kind_names() {
    assert_eq!(TaskKind::ModelTraining.to_string(), "model_training");
    assert_eq!("file_cleanup".parse::<TaskKind>().unwrap(), TaskKind::FileCleanup);
    assert_eq!(
        "upscale".parse::<TaskKind>().unwrap(),
        TaskKind::Custom("upscale".to_string())
    );
}

#[test]
fn test_task_id_unique() {
    let a: TaskId = TaskId::new_v4();
    let b: TaskId = TaskId::new_v4();
    assert_ne!(a, b);
}

#[test]
fn test_elapsed_between() {
    let start = now();
    let later = start + chrono::Duration::milliseconds(1500);
    assert_eq!(elapsed_between(start, later), Duration::from_millis(1500));
    assert_eq!(elapsed_between(later, start), Duration::ZERO);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised");
}
