//! Client record and its capability/task state.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dependency::DependencySet;
use super::patch::PatchSet;
use crate::persistence::store::Store;

/// Capability bitmask announced by a client and persisted with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientFlags(u32);

impl ClientFlags {
    /// The client keeps its state in a key/value data set held by the daemon.
    pub const HAS_CONFIG_DATA_SET: Self = Self(0x01);
    /// The client saves its state to files under its data path.
    pub const HAS_CONFIG_FILE: Self = Self(0x02);
    /// Never resume a lost client for this one; always register as new.
    pub const NO_AUTORESUME: Self = Self(0x08);
    /// The client took part in at least one save round.
    pub const SAVED: Self = Self(0x40);

    /// Empty flag set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from a raw persisted bitmask.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bitmask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for ClientFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Kind of work a client has been asked to perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// No task outstanding.
    #[default]
    Idle,
    /// Save state to files under the data path.
    SaveFile,
    /// Send the daemon a data set to store.
    SaveDataSet,
    /// Restore state from files under the data path.
    LoadFile,
    /// Restore state from a data set sent by the daemon.
    LoadDataSet,
}

impl TaskType {
    /// Whether this task belongs to a save round.
    #[must_use]
    pub fn is_save(self) -> bool {
        matches!(self, Self::SaveFile | Self::SaveDataSet)
    }

    /// Whether this task restores previously saved state.
    #[must_use]
    pub fn is_load(self) -> bool {
        matches!(self, Self::LoadFile | Self::LoadDataSet)
    }
}

/// Which of a project's two client populations a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    /// A running, registered process.
    Active,
    /// A record whose process is gone (or not yet started), kept for resume.
    Lost,
}

/// What a process tells the daemon when it registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Application class, stable across restarts.
    pub class: String,
    /// OS process id; 0 when unknown.
    #[serde(default)]
    pub pid: u32,
    /// Capability flags.
    #[serde(default)]
    pub flags: ClientFlags,
    /// Working directory the process was started in.
    #[serde(default)]
    pub working_dir: PathBuf,
    /// Command line used to start the process.
    #[serde(default)]
    pub argv: Vec<String>,
    /// Bus address requests for this client are delivered to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// One tracked client process of a project.
#[derive(Debug)]
pub struct Client {
    id: Uuid,
    /// Display name, unique within the project.
    pub name: Option<String>,
    /// Application class.
    pub class: String,
    /// OS process id; 0 when not running.
    pub pid: u32,
    /// Capability flags.
    pub flags: ClientFlags,
    /// Working directory.
    pub working_dir: PathBuf,
    /// Launch command line.
    pub argv: Vec<String>,
    /// Private directory under the project.
    pub data_path: Option<PathBuf>,
    /// Backend patch blobs carried while the client is not running.
    pub patches: Vec<PatchSet>,
    /// Prerequisite clients.
    pub dependencies: DependencySet,
    /// Key/value store for data-set clients.
    pub store: Option<Store>,
    /// Bus address for requests.
    pub endpoint: Option<String>,
    /// Active or lost.
    pub membership: Membership,
    /// Task id awaited from this client; 0 means none.
    pub pending_task: u64,
    /// Kind of the pending task.
    pub task_type: TaskType,
    /// Last progress reported for the pending task (0–100).
    pub task_progress: u8,
    pub(crate) admitted: u64,
}

impl Client {
    /// Build a record with an already-assigned identity.
    #[must_use]
    pub fn with_id(id: Uuid, class: impl Into<String>, membership: Membership) -> Self {
        Self {
            id,
            name: None,
            class: class.into(),
            pid: 0,
            flags: ClientFlags::empty(),
            working_dir: PathBuf::new(),
            argv: Vec::new(),
            data_path: None,
            patches: Vec::new(),
            dependencies: DependencySet::default(),
            store: None,
            endpoint: None,
            membership,
            pending_task: 0,
            task_type: TaskType::Idle,
            task_progress: 0,
            admitted: 0,
        }
    }

    /// Build an active record from a registration, adopting `id`.
    #[must_use]
    pub fn from_announcement(id: Uuid, announcement: Announcement) -> Self {
        let mut client = Self::with_id(id, announcement.class, Membership::Active);
        client.pid = announcement.pid;
        client.flags = announcement.flags;
        client.working_dir = announcement.working_dir;
        client.argv = announcement.argv;
        client.endpoint = announcement.endpoint;
        client
    }

    /// Immutable client identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name if assigned, else the id string.
    #[must_use]
    pub fn identity(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    /// Whether the record is in the active population.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.membership == Membership::Active
    }

    /// Whether the client saves state to files.
    #[must_use]
    pub fn has_config_file(&self) -> bool {
        self.flags.contains(ClientFlags::HAS_CONFIG_FILE)
    }

    /// Whether the client keeps state in a daemon-held data set.
    #[must_use]
    pub fn has_config_data_set(&self) -> bool {
        self.flags.contains(ClientFlags::HAS_CONFIG_DATA_SET)
    }

    /// Whether the client was part of a save round.
    #[must_use]
    pub fn was_saved(&self) -> bool {
        self.flags.contains(ClientFlags::SAVED)
    }

    /// Whether a task is outstanding.
    #[must_use]
    pub fn has_pending_task(&self) -> bool {
        self.pending_task != 0
    }

    /// Drop any outstanding task without touching project counters.
    pub fn reset_task(&mut self) {
        self.pending_task = 0;
        self.task_type = TaskType::Idle;
        self.task_progress = 0;
    }

    /// Close the store if one is open, writing unsaved entries.
    pub fn close_store(&mut self) {
        if let Some(store) = self.store.as_mut() {
            if let Err(err) = store.close() {
                tracing::warn!(client_id = %self.id, %err, "failed to close client store");
            }
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identity(), self.class)
    }
}
