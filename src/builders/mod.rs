//! Builders to construct scheduler components from configuration.

pub mod service_builder;

pub use service_builder::{build_checkpoint_store, build_service};
