//! Runtime adapters and API surface.

pub mod api;
pub mod service;
pub mod tokio_spawner;

pub use api::{Health, TaskSubmission};
pub use service::TaskService;
pub use tokio_spawner::TokioSpawner;
