//! Single-task dispatch loop.
//!
//! Every mutation of projects and clients happens here, one event at a
//! time. IPC connections and the watchdog only send [`Event`]s; replies go
//! back on a per-command `oneshot`.

use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use super::command::Command;
use super::daemon::Daemon;
use crate::bus::Mailbox;
use crate::Result;

/// Buffered events before senders wait.
pub const EVENT_CAPACITY: usize = 256;

/// Reply to one command.
pub type Reply = Result<Value>;

/// Delivery address a registering connection offers for client requests.
#[derive(Debug)]
pub struct Endpoint {
    /// Bus address.
    pub name: String,
    /// Queue drained by the connection.
    pub mailbox: Mailbox,
}

/// Input of the dispatch loop.
#[derive(Debug)]
pub enum Event {
    /// A command with its reply channel.
    Command {
        /// The command.
        command: Command,
        /// Present for `register` sent over a connection that can carry
        /// requests back to the client.
        endpoint: Option<Endpoint>,
        /// Where the outcome is sent.
        reply: oneshot::Sender<Reply>,
    },
    /// Periodic watchdog wake-up.
    Tick,
}

/// Apply `command` to `daemon`.
///
/// # Errors
///
/// Returns whatever the underlying operation returns.
pub fn execute(daemon: &mut Daemon, command: Command, endpoint: Option<Endpoint>) -> Reply {
    match command {
        Command::ListProjects => Ok(json!({ "projects": daemon.list_projects() })),
        Command::ScanProjects => {
            let count = daemon.scan_projects()?;
            Ok(json!({ "count": count }))
        }
        Command::Status { project: Some(name) } => Ok(json!(daemon.project_info(&name)?)),
        Command::Status { project: None } => Ok(json!({ "projects": daemon.loaded_projects() })),
        Command::NewProject { name } => {
            let name = daemon.new_project(name.as_deref())?;
            Ok(json!({ "project": name }))
        }
        Command::OpenProject { name } => {
            daemon.open_project(&name)?;
            Ok(json!({ "project": name }))
        }
        Command::CloseProject { project } => {
            daemon.close_project(&project)?;
            Ok(json!({ "project": project }))
        }
        Command::SaveProject { project } => {
            daemon.save_project(&project)?;
            Ok(json!({ "project": project }))
        }
        Command::SaveAll => {
            let failed: Vec<Value> = daemon
                .save_all()
                .into_iter()
                .map(|(project, err)| json!({ "project": project, "error": err.to_string() }))
                .collect();
            Ok(json!({ "failed": failed }))
        }
        Command::MoveProject { project, directory } => {
            daemon.move_project(&project, &directory)?;
            Ok(json!({ "project": project, "directory": directory }))
        }
        Command::RenameProject { project, new_name } => {
            daemon.rename_project(&project, &new_name)?;
            Ok(json!({ "project": new_name }))
        }
        Command::SetDescription {
            project,
            description,
        } => {
            daemon.set_description(&project, &description)?;
            Ok(json!({ "project": project }))
        }
        Command::SetNotes { project, notes } => {
            daemon.set_notes(&project, &notes)?;
            Ok(json!({ "project": project }))
        }
        Command::Register {
            project,
            mut announcement,
        } => {
            let mailbox = endpoint.map(|endpoint| {
                announcement.endpoint = Some(endpoint.name);
                endpoint.mailbox
            });
            let (project, client_id) =
                daemon.register_client(project.as_deref(), announcement, mailbox)?;
            let name = daemon
                .project(&project)
                .and_then(|p| p.client(client_id))
                .and_then(|c| c.name.clone());
            Ok(json!({ "project": project, "client_id": client_id, "name": name }))
        }
        Command::Progress {
            client_id,
            task_id,
            percent,
        } => {
            daemon.client_progress(client_id, task_id, percent)?;
            Ok(Value::Null)
        }
        Command::DataSet {
            client_id,
            task_id,
            configs,
        } => {
            daemon.client_data_set(client_id, task_id, configs)?;
            Ok(Value::Null)
        }
        Command::Patches {
            client_id,
            patch_sets,
        } => {
            daemon.set_client_patches(client_id, patch_sets)?;
            Ok(Value::Null)
        }
        Command::RequestFailed { client_id } => {
            daemon.client_request_failed(client_id)?;
            Ok(Value::Null)
        }
        Command::Disconnect { client_id } => {
            daemon.client_lost(client_id)?;
            Ok(Value::Null)
        }
        Command::RenameClient { client_id, name } => {
            daemon.rename_client(client_id, &name)?;
            Ok(json!({ "client_id": client_id, "name": name }))
        }
        Command::AddDependency {
            client_id,
            dependency,
        } => {
            daemon.add_dependency(client_id, dependency)?;
            Ok(Value::Null)
        }
        Command::RemoveDependency {
            client_id,
            dependency,
        } => {
            daemon.remove_dependency(client_id, dependency)?;
            Ok(Value::Null)
        }
    }
}

/// Watchdog wake-up: abandon overdue tasks and collect exited children.
pub fn tick(daemon: &mut Daemon, now: Instant) {
    let expired = daemon.expire_stalled_tasks(now);
    if !expired.is_empty() {
        warn!(projects = ?expired, "abandoned overdue project tasks");
    }
    daemon.reap_children();
}

/// Serve events until cancelled or every sender is gone, then unload all
/// projects. Returns the daemon for inspection.
pub async fn run(
    mut daemon: Daemon,
    mut events: mpsc::Receiver<Event>,
    ct: CancellationToken,
) -> Daemon {
    loop {
        let event = tokio::select! {
            () = ct.cancelled() => {
                info!("dispatch loop shutting down");
                break;
            }
            event = events.recv() => event,
        };

        match event {
            Some(Event::Command {
                command,
                endpoint,
                reply,
            }) => {
                let span = info_span!("command", command = command.name());
                let _guard = span.enter();

                let result = execute(&mut daemon, command, endpoint);
                if let Err(err) = &result {
                    warn!(%err, "command failed");
                }
                if reply.send(result).is_err() {
                    debug!("command caller went away before the reply");
                }
            }
            Some(Event::Tick) => tick(&mut daemon, Instant::now()),
            None => {
                info!("event channel closed");
                break;
            }
        }
    }

    daemon.shutdown();
    daemon
}
