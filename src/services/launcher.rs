//! Client process launcher.
//!
//! Starts a client's recorded command line in its working directory. The
//! started process is expected to register over IPC on its own; the daemon
//! matches it to the lost record by the pid returned here. The
//! `ENSEMBLE_CLIENT_ID`, `ENSEMBLE_PROJECT` and `ENSEMBLE_IPC_NAME`
//! environment variables tell the client where to report.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::{AppError, Result};

/// Everything needed to start one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Id of the lost record being relaunched.
    pub client_id: Uuid,
    /// Owning project.
    pub project: String,
    /// Application class.
    pub class: String,
    /// Working directory.
    pub working_dir: PathBuf,
    /// Command line; the first element is the program.
    pub argv: Vec<String>,
}

/// Process-spawn collaborator.
pub trait Launcher: Send {
    /// Start the client described by `spec`, returning its pid.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the process cannot be started.
    fn launch(&mut self, spec: &LaunchSpec) -> Result<u32>;

    /// Collect children that exited since the last call.
    fn reap(&mut self) -> Vec<(Uuid, Option<ExitStatus>)> {
        Vec::new()
    }
}

/// Launcher backed by `tokio::process`.
pub struct ProcessLauncher {
    ipc_name: String,
    children: HashMap<Uuid, Child>,
}

impl ProcessLauncher {
    /// Launcher telling clients to report on `ipc_name`.
    #[must_use]
    pub fn new(ipc_name: impl Into<String>) -> Self {
        Self {
            ipc_name: ipc_name.into(),
            children: HashMap::new(),
        }
    }

    /// Number of children still tracked.
    #[must_use]
    pub fn running(&self) -> usize {
        self.children.len()
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, spec: &LaunchSpec) -> Result<u32> {
        let span = info_span!("launch_client", client_id = %spec.client_id, class = %spec.class);
        let _guard = span.enter();

        let Some((program, args)) = spec.argv.split_first() else {
            return Err(AppError::Launch(format!(
                "client {} has no command line",
                spec.client_id
            )));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("ENSEMBLE_CLIENT_ID", spec.client_id.to_string())
            .env("ENSEMBLE_PROJECT", &spec.project)
            .env("ENSEMBLE_IPC_NAME", &self.ipc_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        if !spec.working_dir.as_os_str().is_empty() {
            cmd.current_dir(&spec.working_dir);
        }

        let child = cmd
            .spawn()
            .map_err(|err| AppError::Launch(format!("failed to spawn {program}: {err}")))?;
        let pid = child.id().unwrap_or(0);

        info!(pid, program, "client process spawned");
        self.children.insert(spec.client_id, child);
        Ok(pid)
    }

    fn reap(&mut self) -> Vec<(Uuid, Option<ExitStatus>)> {
        let mut exited = Vec::new();

        for (client_id, child) in &mut self.children {
            match child.try_wait() {
                Ok(Some(status)) => exited.push((*client_id, Some(status))),
                Ok(None) => {}
                Err(err) => {
                    warn!(%client_id, %err, "failed to poll child process status");
                    exited.push((*client_id, None));
                }
            }
        }

        for (client_id, status) in &exited {
            self.children.remove(client_id);
            info!(%client_id, ?status, "launched client process exited");
        }

        exited
    }
}
