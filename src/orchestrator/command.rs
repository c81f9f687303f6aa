//! Inbound commands handled by the dispatch loop.
//!
//! One JSON object per command, tagged by `command`:
//!
//! ```json
//! {"command": "new_project", "name": "Live set"}
//! {"command": "save_project", "project": "Live set"}
//! {"command": "register", "announcement": {"class": "synth", "pid": 4242, "flags": 2}}
//! {"command": "progress", "client_id": "5b0c…", "task_id": 7, "percent": 40}
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::client::Announcement;
use crate::models::patch::PatchSet;

/// Control and client-side operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Projects known on disk.
    ListProjects,
    /// Re-read the projects directory.
    ScanProjects,
    /// Snapshot of one loaded project, or of all when `project` is omitted.
    Status {
        /// Project name.
        project: Option<String>,
    },
    /// Create an empty project.
    NewProject {
        /// Requested name; derived from the configured default when omitted.
        name: Option<String>,
    },
    /// Load a project from disk and relaunch its clients.
    OpenProject {
        /// Project name.
        name: String,
    },
    /// Unload a project, telling its clients to quit.
    CloseProject {
        /// Project name.
        project: String,
    },
    /// Save one project.
    SaveProject {
        /// Project name.
        project: String,
    },
    /// Save every loaded project.
    SaveAll,
    /// Move a project directory.
    MoveProject {
        /// Project name.
        project: String,
        /// New directory.
        directory: PathBuf,
    },
    /// Rename a project.
    RenameProject {
        /// Current name.
        project: String,
        /// New name.
        new_name: String,
    },
    /// Replace a project's description.
    SetDescription {
        /// Project name.
        project: String,
        /// Description text.
        description: String,
    },
    /// Replace a project's notes.
    SetNotes {
        /// Project name.
        project: String,
        /// Notes text.
        notes: String,
    },
    /// A process announces itself as a client.
    Register {
        /// Project to join; the most recently opened one when omitted.
        project: Option<String>,
        /// What the process reports about itself.
        announcement: Announcement,
    },
    /// A client reports progress on its pending task.
    Progress {
        /// Client identifier.
        client_id: Uuid,
        /// Task being reported.
        task_id: u64,
        /// Percentage; 100 completes the task.
        percent: u8,
    },
    /// A data-set client answers a save request.
    DataSet {
        /// Client identifier.
        client_id: Uuid,
        /// Save task being answered.
        task_id: u64,
        /// Configuration entries to store.
        configs: BTreeMap<String, Value>,
    },
    /// A client's backend connections changed.
    Patches {
        /// Client identifier.
        client_id: Uuid,
        /// Connections per backend.
        patch_sets: Vec<PatchSet>,
    },
    /// A request to a client could not be delivered.
    RequestFailed {
        /// Client identifier.
        client_id: Uuid,
    },
    /// A client's connection went away.
    Disconnect {
        /// Client identifier.
        client_id: Uuid,
    },
    /// Rename a client.
    RenameClient {
        /// Client identifier.
        client_id: Uuid,
        /// New display name.
        name: String,
    },
    /// Make a client wait for another on the next load.
    AddDependency {
        /// Dependent client.
        client_id: Uuid,
        /// Prerequisite client.
        dependency: Uuid,
    },
    /// Drop a dependency.
    RemoveDependency {
        /// Dependent client.
        client_id: Uuid,
        /// Prerequisite client.
        dependency: Uuid,
    },
}

impl Command {
    /// Wire name of the command, for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListProjects => "list_projects",
            Self::ScanProjects => "scan_projects",
            Self::Status { .. } => "status",
            Self::NewProject { .. } => "new_project",
            Self::OpenProject { .. } => "open_project",
            Self::CloseProject { .. } => "close_project",
            Self::SaveProject { .. } => "save_project",
            Self::SaveAll => "save_all",
            Self::MoveProject { .. } => "move_project",
            Self::RenameProject { .. } => "rename_project",
            Self::SetDescription { .. } => "set_description",
            Self::SetNotes { .. } => "set_notes",
            Self::Register { .. } => "register",
            Self::Progress { .. } => "progress",
            Self::DataSet { .. } => "data_set",
            Self::Patches { .. } => "patches",
            Self::RequestFailed { .. } => "request_failed",
            Self::Disconnect { .. } => "disconnect",
            Self::RenameClient { .. } => "rename_client",
            Self::AddDependency { .. } => "add_dependency",
            Self::RemoveDependency { .. } => "remove_dependency",
        }
    }
}
