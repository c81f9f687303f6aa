//! Projects: named groups of clients saved and restored together.
//!
//! A [`Project`] owns every client record it knows about in one map keyed
//! by client id. Each record is tagged [`Membership::Active`] (a running,
//! registered process) or [`Membership::Lost`] (process gone or not yet
//! started, kept so a restart can resume its identity). Operations are
//! split by concern:
//!
//! - [`naming`]: unique display names
//! - [`registration`]: new clients, resume matching, losing clients
//! - [`dependency`]: deferred launches waiting on prerequisites
//! - [`task`]: save/load rounds and progress aggregation
//! - [`lifecycle`]: save, load, move and unload on disk

pub mod dependency;
pub mod lifecycle;
pub mod naming;
pub mod registration;
pub mod task;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::bus::Signal;
use crate::models::client::{Client, Membership};
use crate::models::view::{ClientInfo, ProjectInfo};
use crate::persistence::dirs;
use crate::persistence::document::ProjectDocument;
use crate::services::Services;
use crate::{AppError, Result};

pub use self::task::{ProjectTask, ProjectTaskKind};

/// A project and all of its clients.
#[derive(Debug)]
pub struct Project {
    name: String,
    directory: PathBuf,
    description: String,
    notes: String,
    clients: BTreeMap<Uuid, Client>,
    admitted: u64,
    document: Option<ProjectDocument>,
    modified: bool,
    task: ProjectTask,
}

impl Project {
    /// Create an empty project that has never been saved.
    #[must_use]
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            description: String::new(),
            notes: String::new(),
            clients: BTreeMap::new(),
            admitted: 0,
            document: None,
            modified: false,
            task: ProjectTask::default(),
        }
    }

    /// Project name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Project directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Description text.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Notes text.
    #[must_use]
    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Whether there are unsaved changes.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Last document written or read; `None` for a project never saved.
    #[must_use]
    pub fn document(&self) -> Option<&ProjectDocument> {
        self.document.as_ref()
    }

    /// Running project task.
    #[must_use]
    pub fn task(&self) -> &ProjectTask {
        &self.task
    }

    /// Client by id, active or lost.
    #[must_use]
    pub fn client(&self, id: Uuid) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Mutable client by id, active or lost.
    pub fn client_mut(&mut self, id: Uuid) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    /// Whether `id` is an active client of this project.
    #[must_use]
    pub fn has_active_client(&self, id: Uuid) -> bool {
        self.clients.get(&id).is_some_and(Client::is_active)
    }

    /// All clients in insertion order.
    #[must_use]
    pub fn clients(&self) -> Vec<&Client> {
        let mut all: Vec<&Client> = self.clients.values().collect();
        all.sort_by_key(|client| client.admitted);
        all
    }

    /// Active clients in insertion order.
    #[must_use]
    pub fn active_clients(&self) -> Vec<&Client> {
        self.members(Membership::Active)
    }

    /// Lost clients in insertion order, oldest first.
    #[must_use]
    pub fn lost_clients(&self) -> Vec<&Client> {
        self.members(Membership::Lost)
    }

    /// Ids of clients with `membership`, oldest first.
    #[must_use]
    pub fn member_ids(&self, membership: Membership) -> Vec<Uuid> {
        self.members(membership).iter().map(|c| c.id()).collect()
    }

    fn members(&self, membership: Membership) -> Vec<&Client> {
        self.clients()
            .into_iter()
            .filter(|client| client.membership == membership)
            .collect()
    }

    /// Data directory for client `id`.
    #[must_use]
    pub fn client_dir(&self, id: Uuid) -> PathBuf {
        dirs::client_dir(&self.directory, &id.to_string())
    }

    /// Store directory for client `id`.
    #[must_use]
    pub fn client_config_dir(&self, id: Uuid) -> PathBuf {
        dirs::config_dir(&self.client_dir(id))
    }

    /// Add a record, stamping its insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rejected` if a client with the same id exists.
    pub(crate) fn insert(&mut self, mut client: Client) -> Result<()> {
        if self.clients.contains_key(&client.id()) {
            return Err(AppError::Rejected(format!(
                "client {} already belongs to project '{}'",
                client.id(),
                self.name
            )));
        }
        self.admitted += 1;
        client.admitted = self.admitted;
        self.clients.insert(client.id(), client);
        Ok(())
    }

    pub(crate) fn take(&mut self, id: Uuid) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Flip the unsaved-changes flag, signalling only on change.
    pub fn set_modified(&mut self, svc: &mut Services, modified: bool) {
        if self.modified == modified {
            return;
        }
        self.modified = modified;
        svc.emit(Signal::ProjectModifiedStatusChanged {
            project: self.name.clone(),
            modified,
        });
    }

    /// Rename the project. Uniqueness across projects is the daemon's
    /// concern.
    pub fn rename(&mut self, svc: &mut Services, new_name: &str) {
        let old_name = std::mem::replace(&mut self.name, new_name.to_owned());
        info!(old_name, new_name, "project renamed");
        svc.emit(Signal::ProjectNameChanged {
            old_name,
            new_name: new_name.to_owned(),
        });
        self.set_modified(svc, true);
    }

    /// Replace the description.
    pub fn set_description(&mut self, svc: &mut Services, description: &str) {
        description.clone_into(&mut self.description);
        svc.emit(Signal::ProjectDescriptionChanged {
            project: self.name.clone(),
            description: description.to_owned(),
        });
        self.set_modified(svc, true);
    }

    /// Replace the notes.
    pub fn set_notes(&mut self, svc: &mut Services, notes: &str) {
        notes.clone_into(&mut self.notes);
        svc.emit(Signal::ProjectNotesChanged {
            project: self.name.clone(),
            notes: notes.to_owned(),
        });
        self.set_modified(svc, true);
    }

    /// Snapshot for control clients.
    #[must_use]
    pub fn info(&self) -> ProjectInfo {
        ProjectInfo {
            name: self.name.clone(),
            directory: self.directory.clone(),
            description: self.description.clone(),
            notes: self.notes.clone(),
            modified: self.modified,
            task: self.task.kind.as_str().to_owned(),
            tasks_total: self.task.total,
            tasks_pending: self.task.pending,
            clients: self.clients().into_iter().map(ClientInfo::from).collect(),
        }
    }
}
