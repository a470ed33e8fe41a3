//! Scheduler configuration structures.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{ResourceLedger, TaskDefaults};
use crate::util::serde::{ResourceKind, ResourceVector};

/// Where a retried task lands in its priority band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOrdering {
    /// Order the retry by its creation time, ahead of newer submissions of
    /// the same priority.
    #[default]
    PreserveCreatedAt,
    /// Treat the retry as newly submitted (back of its priority band).
    Requeue,
}

/// Checkpoint backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CheckpointBackendConfig {
    /// Keep snapshots in memory only; nothing survives the process.
    InMemory,
    /// JSON file written with temp-file-and-rename.
    File {
        /// Checkpoint file path.
        path: PathBuf,
    },
}

impl Default for CheckpointBackendConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("tasks.json"),
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of simultaneously processing tasks.
    pub max_concurrent_tasks: usize,
    /// Ledger capacity.
    pub capacity: ResourceVector,
    /// Attempt timeout for tasks that do not set one. Zero disables it.
    pub default_timeout_secs: u64,
    /// Retry bound for tasks that do not set one.
    pub default_max_retries: u32,
    /// Period of the timeout sweep.
    pub timeout_sweep_interval_ms: u64,
    /// Longest the dispatch loop sleeps when there is nothing to admit.
    pub dispatch_idle_ms: u64,
    /// Delay before retrying a head-of-queue task whose resources did not fit.
    pub resource_backoff_ms: u64,
    /// Queue position of retried tasks.
    pub retry_ordering: RetryOrdering,
    /// Checkpoint backend.
    pub checkpoint: CheckpointBackendConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 2,
            capacity: ResourceLedger::default_capacity(),
            default_timeout_secs: 3600,
            default_max_retries: 3,
            timeout_sweep_interval_ms: 10_000,
            dispatch_idle_ms: 1_000,
            resource_backoff_ms: 5_000,
            retry_ordering: RetryOrdering::PreserveCreatedAt,
            checkpoint: CheckpointBackendConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_tasks == 0 {
            return Err("max_concurrent_tasks must be greater than 0".into());
        }
        if let Some((kind, amount)) = self.capacity.invalid_entry() {
            return Err(format!("capacity for `{kind}` must be a non-negative number, got {amount}"));
        }
        if self.timeout_sweep_interval_ms == 0 {
            return Err("timeout_sweep_interval_ms must be greater than 0".into());
        }
        if self.dispatch_idle_ms == 0 {
            return Err("dispatch_idle_ms must be greater than 0".into());
        }
        if self.resource_backoff_ms == 0 {
            return Err("resource_backoff_ms must be greater than 0".into());
        }
        if let CheckpointBackendConfig::File { path } = &self.checkpoint {
            if path.as_os_str().is_empty() {
                return Err("checkpoint file path must not be empty".into());
            }
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    /// Omitted fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the process environment, loading `.env`
    /// first (a missing file is ignored). See [`from_lookup`](Self::from_lookup)
    /// for the recognised variables.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed or invalid value.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from `TASKQ_*` variables resolved through
    /// `lookup`, falling back to defaults for unset ones:
    ///
    /// `TASKQ_MAX_CONCURRENT_TASKS`, `TASKQ_CPU`, `TASKQ_MEMORY_MB`,
    /// `TASKQ_GPU`, `TASKQ_DEFAULT_TIMEOUT_SECS`, `TASKQ_DEFAULT_MAX_RETRIES`,
    /// `TASKQ_SWEEP_INTERVAL_MS`, `TASKQ_DISPATCH_IDLE_MS`,
    /// `TASKQ_RESOURCE_BACKOFF_MS`, `TASKQ_RETRY_ORDERING`
    /// (`preserve_created_at` | `requeue`) and `TASKQ_CHECKPOINT`
    /// (`memory` or a file path).
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed or invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("TASKQ_MAX_CONCURRENT_TASKS") {
            cfg.max_concurrent_tasks = parse_var("TASKQ_MAX_CONCURRENT_TASKS", &v)?;
        }
        for (key, kind) in [
            ("TASKQ_CPU", ResourceKind::Cpu),
            ("TASKQ_MEMORY_MB", ResourceKind::Memory),
            ("TASKQ_GPU", ResourceKind::Gpu),
        ] {
            if let Some(v) = get(key) {
                cfg.capacity.set(kind, parse_var(key, &v)?);
            }
        }
        if let Some(v) = get("TASKQ_DEFAULT_TIMEOUT_SECS") {
            cfg.default_timeout_secs = parse_var("TASKQ_DEFAULT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("TASKQ_DEFAULT_MAX_RETRIES") {
            cfg.default_max_retries = parse_var("TASKQ_DEFAULT_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("TASKQ_SWEEP_INTERVAL_MS") {
            cfg.timeout_sweep_interval_ms = parse_var("TASKQ_SWEEP_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("TASKQ_DISPATCH_IDLE_MS") {
            cfg.dispatch_idle_ms = parse_var("TASKQ_DISPATCH_IDLE_MS", &v)?;
        }
        if let Some(v) = get("TASKQ_RESOURCE_BACKOFF_MS") {
            cfg.resource_backoff_ms = parse_var("TASKQ_RESOURCE_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("TASKQ_RETRY_ORDERING") {
            cfg.retry_ordering = match v.to_ascii_lowercase().as_str() {
                "preserve_created_at" | "preserve" => RetryOrdering::PreserveCreatedAt,
                "requeue" => RetryOrdering::Requeue,
                other => return Err(format!("TASKQ_RETRY_ORDERING: unknown value `{other}`")),
            };
        }
        if let Some(v) = get("TASKQ_CHECKPOINT") {
            cfg.checkpoint = if v.eq_ignore_ascii_case("memory") {
                CheckpointBackendConfig::InMemory
            } else {
                CheckpointBackendConfig::File { path: PathBuf::from(v) }
            };
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Fallback limits for tasks.
    #[must_use]
    pub const fn task_defaults(&self) -> TaskDefaults {
        TaskDefaults {
            timeout: Duration::from_secs(self.default_timeout_secs),
            max_retries: self.default_max_retries,
        }
    }

    /// Timeout sweep period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_sweep_interval_ms)
    }

    /// Idle wait of the dispatch loop.
    #[must_use]
    pub const fn dispatch_idle(&self) -> Duration {
        Duration::from_millis(self.dispatch_idle_ms)
    }

    /// Back-off after a failed reservation.
    #[must_use]
    pub const fn resource_backoff(&self) -> Duration {
        Duration::from_millis(self.resource_backoff_ms)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| format!("{key}: invalid value `{value}`: {e}"))
}
