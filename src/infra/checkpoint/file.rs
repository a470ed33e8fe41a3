//! File-backed checkpoint.
//!
//! The snapshot is written as pretty JSON to a hidden temp file next to the
//! target and then renamed over it, so a crash mid-write leaves the previous
//! snapshot in place.
//!
//! A file that exists but cannot be read or parsed is renamed to
//! `<name>.corrupt-<timestamp>` before the error is returned, so the next
//! save starts a fresh file instead of replacing the old one. If that rename
//! fails the backend refuses every later save.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, warn};

use crate::core::{Checkpoint, CheckpointStore, SchedulerError};
use crate::util::clock::now;

/// Checkpoint stored in a single JSON file.
#[derive(Debug)]
pub struct FileCheckpoint {
    path: PathBuf,
    sealed: AtomicBool,
}

impl FileCheckpoint {
    /// Backend writing to `path`. Parent directories are created on first save.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sealed: AtomicBool::new(false),
        }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| "checkpoint".into(), |n| n.to_string_lossy().into_owned())
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_file_name(format!(".{}.tmp", self.file_name()))
    }

    fn corrupt_path(&self) -> PathBuf {
        let stamp = now().format("%Y%m%dT%H%M%S%.6fZ");
        self.path
            .with_file_name(format!("{}.corrupt-{stamp}", self.file_name()))
    }

    /// Move an unreadable snapshot out of the way and build the load error.
    fn quarantine(&self, cause: SchedulerError) -> SchedulerError {
        let target = self.corrupt_path();
        match fs::rename(&self.path, &target) {
            Ok(()) => {
                warn!(
                    path = %self.path.display(),
                    moved_to = %target.display(),
                    error = %cause,
                    "unreadable checkpoint moved aside"
                );
                SchedulerError::Persistence(format!("{cause}; moved to {}", target.display()))
            }
            Err(e) => {
                self.sealed.store(true, Ordering::Release);
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "cannot move unreadable checkpoint aside, refusing to overwrite it"
                );
                cause
            }
        }
    }
}

fn backend_err(action: &str, path: &Path, err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Persistence(format!("{action} {}: {err}", path.display()))
}

impl CheckpointStore for FileCheckpoint {
    fn load(&self) -> Result<Option<Checkpoint>, SchedulerError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.quarantine(backend_err("read", &self.path, e))),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| self.quarantine(backend_err("parse", &self.path, e)))
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), SchedulerError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(SchedulerError::Persistence(format!(
                "refusing to overwrite unreadable checkpoint {}",
                self.path.display()
            )));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| backend_err("create", parent, e))?;
        }
        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| backend_err("serialize", &self.path, e))?;

        let tmp = self.tmp_path();
        let mut file = File::create(&tmp).map_err(|e| backend_err("create", &tmp, e))?;
        file.write_all(&body).map_err(|e| backend_err("write", &tmp, e))?;
        file.sync_all().map_err(|e| backend_err("sync", &tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| backend_err("rename", &tmp, e))?;
        Ok(())
    }
}
