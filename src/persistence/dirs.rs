//! Directory helpers for project and client data paths.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Directory under a project holding one data directory per client.
pub const CLIENTS_DIR: &str = ".clients";
/// Sub-directory of a client data path holding its store.
pub const CONFIG_DIR: &str = "config";

/// Data path of client `id_str` in `project_dir`.
#[must_use]
pub fn client_dir(project_dir: &Path, id_str: &str) -> PathBuf {
    project_dir.join(CLIENTS_DIR).join(id_str)
}

/// Store directory of a client data path.
#[must_use]
pub fn config_dir(data_path: &Path) -> PathBuf {
    data_path.join(CONFIG_DIR)
}

/// Create `dir` and its parents.
///
/// # Errors
///
/// Returns `AppError::Io` if creation fails.
pub fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|err| AppError::Io(format!("cannot create {}: {err}", dir.display())))?;
    debug!(dir = %dir.display(), "directory ensured");
    Ok(())
}

/// Remove `dir` recursively, logging instead of failing.
pub fn remove_dir(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!(dir = %dir.display(), "directory removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(dir = %dir.display(), %err, "failed to remove directory"),
    }
}

/// Remove `dir` only if it exists and is empty.
pub fn remove_if_empty(dir: &Path) {
    let empty = fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
    if empty {
        remove_dir(dir);
    }
}

/// Modification time of `path`, if available.
#[must_use]
pub fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
