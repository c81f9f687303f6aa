//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Project task supervision settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    /// Seconds a save or load round may run before it is force-completed;
    /// 0 means never.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Watchdog period in seconds.
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            poll_seconds: default_poll_seconds(),
        }
    }
}

impl TaskConfig {
    /// Forced-completion threshold, or `None` when disabled.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_seconds > 0).then(|| Duration::from_secs(self.timeout_seconds))
    }

    /// Watchdog tick interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_seconds)
    }
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_poll_seconds() -> u64 {
    5
}

fn default_ipc_name() -> String {
    "ensembled".into()
}

fn default_project_name() -> String {
    "Untitled".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding one sub-directory per project.
    pub projects_dir: PathBuf,
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Base name for projects created without an explicit name.
    #[serde(default = "default_project_name")]
    pub default_project_name: String,
    /// Save/load round supervision.
    #[serde(default)]
    pub tasks: TaskConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the projects directory, re-running path validation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory does not exist.
    pub fn override_projects_dir(&mut self, dir: PathBuf) -> Result<()> {
        self.projects_dir = dir;
        self.validate()
    }

    /// Directory a project called `name` is created in.
    #[must_use]
    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.projects_dir.join(name)
    }

    fn validate(&mut self) -> Result<()> {
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        if self.default_project_name.trim().is_empty() {
            return Err(AppError::Config(
                "default_project_name must not be empty".into(),
            ));
        }

        if self.tasks.poll_seconds == 0 {
            return Err(AppError::Config(
                "tasks.poll_seconds must be greater than zero".into(),
            ));
        }

        let canonical_root = self
            .projects_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("projects_dir invalid: {err}")))?;
        self.projects_dir = canonical_root;

        Ok(())
    }
}
