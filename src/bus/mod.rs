//! Message bus seam between the daemon core and its transport.
//!
//! The core only needs two primitives: fire-and-forget [`Signal`]s that any
//! observer may watch, and [`ClientRequest`]s addressed to a single client
//! endpoint. Replies to requests are not awaited here; a client's progress
//! and completion arrive later as separate inbound commands.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Result;

pub mod channel;

/// Outbound notification for observers (UIs, scripts) and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// A client joined a project (new or resumed).
    ClientAppeared {
        /// Client identifier.
        client_id: Uuid,
        /// Owning project.
        project: String,
        /// Resolved display name.
        name: Option<String>,
    },
    /// A client's process went away; its record is now lost.
    ClientDisappeared {
        /// Client identifier.
        client_id: Uuid,
        /// Owning project.
        project: String,
    },
    /// A client was renamed.
    ClientNameChanged {
        /// Client identifier.
        client_id: Uuid,
        /// New name.
        name: String,
    },
    /// A project was created or opened.
    ProjectAppeared {
        /// Project name.
        project: String,
        /// Project directory.
        directory: PathBuf,
    },
    /// A project was closed.
    ProjectDisappeared {
        /// Project name.
        project: String,
    },
    /// Every client completed a save round.
    ProjectSaved {
        /// Project name.
        project: String,
    },
    /// Every client completed a restore round.
    ProjectLoaded {
        /// Project name.
        project: String,
    },
    /// The project directory moved.
    ProjectPathChanged {
        /// Project name.
        project: String,
        /// New directory.
        directory: PathBuf,
    },
    /// The project was renamed.
    ProjectNameChanged {
        /// Previous name.
        old_name: String,
        /// New name.
        new_name: String,
    },
    /// The project description changed.
    ProjectDescriptionChanged {
        /// Project name.
        project: String,
        /// New description.
        description: String,
    },
    /// The project notes changed.
    ProjectNotesChanged {
        /// Project name.
        project: String,
        /// New notes.
        notes: String,
    },
    /// The unsaved-changes flag flipped.
    ProjectModifiedStatusChanged {
        /// Project name.
        project: String,
        /// New flag value.
        modified: bool,
    },
    /// Aggregate progress of the running project task (0–99, 0 on reset).
    Progress {
        /// Percentage.
        percent: u8,
    },
    /// Clients of `project` must save; report completion with `task_id`.
    Save {
        /// Project name.
        project: String,
        /// Task identifier to report against.
        task_id: u64,
    },
    /// Clients of `project` must exit.
    Quit {
        /// Project name.
        project: String,
    },
    /// A project task was abandoned after the configured timeout.
    TaskTimedOut {
        /// Project name.
        project: String,
    },
}

/// Request addressed to a single client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Restore state from files under `data_path`.
    Load {
        /// Task identifier to report against.
        task_id: u64,
        /// Client data directory.
        data_path: PathBuf,
    },
    /// Restore state from the supplied data set.
    LoadDataSet {
        /// Task identifier to report against.
        task_id: u64,
        /// Stored configuration entries.
        configs: BTreeMap<String, Value>,
    },
}

/// Delivery queue of one client endpoint.
pub type Mailbox = mpsc::UnboundedSender<ClientRequest>;

/// Transport used by the daemon core.
pub trait Bus: Send {
    /// Broadcast `signal` to every observer.
    fn emit(&mut self, signal: Signal);

    /// Deliver `request` to the client reachable at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Delivery` if the request cannot be delivered.
    fn call(&mut self, endpoint: &str, request: ClientRequest) -> Result<()>;

    /// Make `endpoint` reachable through `mailbox`.
    fn attach(&mut self, _endpoint: &str, _mailbox: Mailbox) {}

    /// Forget `endpoint`.
    fn detach(&mut self, _endpoint: &str) {}
}
