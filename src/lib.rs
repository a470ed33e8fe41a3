//! # Prometheus Task Queue
//!
//! An in-process job orchestration engine for long-running media and ML
//! work: model training, audio synthesis, video generation and cleanup.
//!
//! Tasks are admitted by priority (FIFO within a priority), only when a
//! concurrency slot is free and their declared resource requirement fits
//! the remaining capacity of a shared ledger. Failed or timed-out attempts
//! are retried up to a bound. Every state change is checkpointed to JSON so
//! a restart can resume queued work and account for what was interrupted.
//!
//! ## Core pieces
//!
//! - **`TaskQueue`**: scheduler core with the admission queue, task tables,
//!   resource ledger, dispatch loop and timeout sweep
//! - **`TaskService`**: facade that owns the loops and exposes the operations
//! - **`TaskExecutor`**: async work function trait, registered per kind
//! - **`CheckpointStore`**: snapshot backend (`FileCheckpoint`, `InMemoryCheckpoint`)
//!
//! ```rust,ignore
//! use prometheus_task_queue::builders::build_service;
//! use prometheus_task_queue::config::SchedulerConfig;
//! use prometheus_task_queue::core::{ExecutorRegistry, TaskSpec};
//! use prometheus_task_queue::runtime::TokioSpawner;
//! use prometheus_task_queue::util::serde::{Priority, TaskKind};
//!
//! let executors = ExecutorRegistry::new().with(TaskKind::AudioSynthesis, TtsExecutor::new());
//! let service = build_service(&SchedulerConfig::from_env()?, executors, TokioSpawner::current())?;
//! service.start();
//!
//! let id = service.create_task(
//!     TaskSpec::new(TaskKind::AudioSynthesis, "alice")
//!         .with_priority(Priority::High)
//!         .with_param("text", "hello"),
//! )?;
//! println!("{:?}", service.get(&id));
//! service.stop().await;
//! ```
//!
//! For complete scenarios see `tests/scheduler_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and capacity accounting.
pub mod core;
/// Configuration models for the scheduler and its checkpoint backend.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for the admission queue and checkpoint backends.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
