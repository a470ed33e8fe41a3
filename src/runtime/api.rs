//! API-facing request/response models.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{QueueStatus, SchedulerError, TaskSpec};
use crate::util::serde::{Priority, ResourceVector, TaskKind};

/// Task submission payload as it arrives over a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Kind name, e.g. `audio_synthesis`. Unknown names become custom kinds.
    pub task_type: String,
    /// Submitting user.
    pub username: String,
    /// Priority; normal when omitted.
    #[serde(default)]
    pub priority: Priority,
    /// Parameters handed to the work function.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Attempt timeout in seconds. Zero disables it.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Retry bound.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Declared requirement.
    #[serde(default)]
    pub resources: Option<ResourceVector>,
}

impl TaskSubmission {
    /// Convert into a [`TaskSpec`] without an executor; the scheduler picks
    /// the one registered for the kind.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Validation`] for an empty kind name or any
    /// check [`TaskSpec::validate`] rejects.
    pub fn into_spec(self) -> Result<TaskSpec, SchedulerError> {
        let kind: TaskKind = self.task_type.parse().map_err(SchedulerError::Validation)?;
        let mut spec = TaskSpec::new(kind, self.username)
            .with_priority(self.priority)
            .with_params(self.params);
        if let Some(secs) = self.timeout_secs {
            spec = spec.with_timeout(Duration::from_secs(secs));
        }
        if let Some(max_retries) = self.max_retries {
            spec = spec.with_max_retries(max_retries);
        }
        if let Some(resources) = self.resources {
            spec = spec.with_resources(resources);
        }
        spec.validate()?;
        Ok(spec)
    }
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag: the background loops are running.
    pub ok: bool,
    /// Queued tasks.
    pub pending: usize,
    /// Processing tasks.
    pub active: usize,
}

impl Health {
    /// Health payload from a status snapshot.
    #[must_use]
    pub const fn from_status(running: bool, status: &QueueStatus) -> Self {
        Self {
            ok: running,
            pending: status.pending_count,
            active: status.active_count,
        }
    }
}
