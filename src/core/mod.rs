//! Core scheduling abstractions and capacity accounting.

pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod scheduler;
pub mod task;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::{AppResult, SchedulerError};
pub use executor::{ExecutorRegistry, TaskContext, TaskExecutor};
pub use ledger::ResourceLedger;
pub use scheduler::{QueueStatus, StatusCounts, TaskQueue, UserDirectory};
pub use task::{CancellationFlag, Task, TaskDefaults, TaskRecord, TaskSpec, TaskStatus};
