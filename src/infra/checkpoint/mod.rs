//! Checkpoint backends.

pub mod file;
pub mod memory;

pub use file::FileCheckpoint;
pub use memory::InMemoryCheckpoint;
