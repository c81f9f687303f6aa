//! Serializable snapshots handed to control clients.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::client::{Client, Membership, TaskType};

/// Snapshot of one client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client identifier.
    pub id: Uuid,
    /// Display name.
    pub name: Option<String>,
    /// Application class.
    pub class: String,
    /// OS process id, 0 when not running.
    pub pid: u32,
    /// Raw capability bitmask.
    pub flags: u32,
    /// Active or lost.
    pub membership: Membership,
    /// Outstanding task kind.
    pub task_type: TaskType,
    /// Progress of the outstanding task.
    pub task_progress: u8,
    /// Declared prerequisites.
    pub dependencies: Vec<Uuid>,
    /// Prerequisites still awaited.
    pub unsatisfied: Vec<Uuid>,
}

impl From<&Client> for ClientInfo {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id(),
            name: client.name.clone(),
            class: client.class.clone(),
            pid: client.pid,
            flags: client.flags.bits(),
            membership: client.membership,
            task_type: client.task_type,
            task_progress: client.task_progress,
            dependencies: client.dependencies.declared().to_vec(),
            unsatisfied: client.dependencies.unsatisfied().to_vec(),
        }
    }
}

/// Snapshot of a loaded project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectInfo {
    /// Project name.
    pub name: String,
    /// Project directory.
    pub directory: PathBuf,
    /// Description text.
    pub description: String,
    /// Notes text.
    pub notes: String,
    /// Unsaved changes present.
    pub modified: bool,
    /// Running project task, `idle` when none.
    pub task: String,
    /// Clients taking part in the running task.
    pub tasks_total: u32,
    /// Clients yet to complete the running task.
    pub tasks_pending: u32,
    /// Clients in insertion order.
    pub clients: Vec<ClientInfo>,
}

/// What the daemon knows about a project on disk without loading it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSummary {
    /// Project name from the document.
    pub name: String,
    /// Project directory.
    pub directory: PathBuf,
    /// Description from the document.
    pub description: String,
    /// Modification time of the directory.
    pub last_modified: Option<DateTime<Utc>>,
}
