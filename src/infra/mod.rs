//! Infrastructure adapters for the admission queue and checkpoint backends.

pub mod checkpoint;
pub mod queue;
pub use checkpoint::{FileCheckpoint, InMemoryCheckpoint};
pub use queue::AdmissionQueue;
