//! Admission queue backends.

pub mod memory;

pub use memory::{AdmissionQueue, QueueKey};
