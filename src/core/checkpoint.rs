//! Checkpoint snapshot format and storage abstraction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{SchedulerError, TaskRecord};
use crate::util::serde::TaskId;

/// Durable snapshot of the scheduler tables.
///
/// `in_flight` holds every task that has not reached a terminal status
/// (queued or processing); `completed` holds terminal tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Non-terminal tasks by id.
    #[serde(default, alias = "active_tasks")]
    pub in_flight: BTreeMap<TaskId, TaskRecord>,
    /// Terminal tasks by id.
    #[serde(default, alias = "completed_tasks")]
    pub completed: BTreeMap<TaskId, TaskRecord>,
}

impl Checkpoint {
    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.len() + self.completed.len()
    }

    /// Whether the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty() && self.completed.is_empty()
    }
}

/// Abstraction for checkpoint backends.
pub trait CheckpointStore: Send {
    /// Read the last saved snapshot, `None` when nothing was ever saved.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Persistence`] when the stored snapshot
    /// cannot be read or parsed.
    fn load(&self) -> Result<Option<Checkpoint>, SchedulerError>;

    /// Replace the stored snapshot. A failed save must leave the previous
    /// snapshot intact.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Persistence`] when the snapshot cannot be written.
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), SchedulerError>;
}
