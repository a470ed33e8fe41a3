//! In-memory checkpoint backend.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{Checkpoint, CheckpointStore, SchedulerError};

/// Checkpoint kept in memory. Clones share the same slot, so a test can
/// hand one clone to a scheduler and keep another to inspect it or to seed
/// a "restarted" scheduler.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpoint {
    slot: Arc<Mutex<Option<Checkpoint>>>,
    saves: Arc<Mutex<u64>>,
}

impl InMemoryCheckpoint {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-seeded with a snapshot.
    #[must_use]
    pub fn with_snapshot(checkpoint: Checkpoint) -> Self {
        let store = Self::new();
        *store.slot.lock() = Some(checkpoint);
        store
    }

    /// Copy of the last saved snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Option<Checkpoint> {
        self.slot.lock().clone()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        *self.saves.lock()
    }
}

impl CheckpointStore for InMemoryCheckpoint {
    fn load(&self) -> Result<Option<Checkpoint>, SchedulerError> {
        Ok(self.snapshot())
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), SchedulerError> {
        *self.slot.lock() = Some(checkpoint.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}
