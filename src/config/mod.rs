//! Configuration models for the scheduler, its limits and checkpoint backend.

pub mod scheduler;

pub use scheduler::{CheckpointBackendConfig, RetryOrdering, SchedulerConfig};
