//! Saving, loading, moving and unloading projects on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, info_span, warn};

use super::Project;
use crate::bus::Signal;
use crate::models::client::{Client, ClientFlags};
use crate::models::view::ProjectSummary;
use crate::persistence::dirs;
use crate::persistence::document::{ClientElement, ProjectDocument, DOCUMENT_VERSION};
use crate::persistence::notes;
use crate::services::Services;
use crate::{AppError, Result};

impl Project {
    /// Reconstruct a project from the document in `directory`. Every
    /// persisted client becomes a lost record waiting for its process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the document cannot be read and
    /// `AppError::Document` if it has no root or no name.
    pub fn open(directory: &Path) -> Result<Self> {
        let span = info_span!("open_project", directory = %directory.display());
        let _guard = span.enter();

        let document = ProjectDocument::read_from(directory)?;
        let name = document.name.clone().unwrap_or_default();
        let mut project = Self::new(name, directory);
        project.description.clone_from(&document.description);

        for element in &document.clients {
            let mut client = match element.restore() {
                Ok(client) => client,
                Err(err) => {
                    warn!(%err, class = %element.class, "skipping unreadable client");
                    continue;
                }
            };
            client.data_path = Some(project.client_dir(client.id()));
            if let Err(err) = project.insert(client) {
                warn!(%err, "skipping duplicate client");
            }
        }

        match notes::read_notes(directory) {
            Ok(text) => project.notes = text,
            Err(err) => warn!(%err, project = %project.name, "failed to read project notes"),
        }

        info!(
            project = %project.name,
            clients = project.clients.len(),
            "restored project"
        );
        project.document = Some(document);
        project.modified = false;
        Ok(project)
    }

    /// Read the name and description of the project in `directory`
    /// without loading its clients.
    ///
    /// # Errors
    ///
    /// Same as [`Project::open`].
    pub fn peek(directory: &Path) -> Result<ProjectSummary> {
        let document = ProjectDocument::read_from(directory)?;
        Ok(ProjectSummary {
            name: document.name.unwrap_or_default(),
            directory: directory.to_path_buf(),
            description: document.description,
            last_modified: dirs::modified_time(directory),
        })
    }

    /// Save the project: write the document and notes, then ask every
    /// active client to save its own state.
    ///
    /// Lost clients still pending at this point are crash leftovers and
    /// are purged from disk and memory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rejected` if a task is running or a client has a
    /// pending task, and `AppError::Io`/`AppError::Document` if the
    /// document cannot be written. The project is unchanged in every error
    /// case.
    pub fn save(&mut self, svc: &mut Services) -> Result<()> {
        let span = info_span!("save_project", project = %self.name);
        let _guard = span.enter();

        self.check_can_save()?;
        info!("saving project");

        dirs::create_dir(&self.directory)?;

        let document = self.build_document(svc);
        if let Err(err) = document.write_to(&self.directory) {
            error!(%err, "error writing project document; aborting save");
            return Err(err);
        }
        self.document = Some(document);

        svc.emit(Signal::Progress { percent: 0 });
        self.begin_save_round(svc)?;

        if let Err(err) = notes::write_notes(&self.directory, &self.notes) {
            error!(%err, "error writing project notes");
        }

        self.purge_lost_clients();

        // No client to wait for: the document alone is the save.
        if self.task.is_idle() {
            svc.emit(Signal::ProjectSaved {
                project: self.name.clone(),
            });
            self.set_modified(svc, false);
        }
        Ok(())
    }

    fn check_can_save(&self) -> Result<()> {
        if !self.task.is_idle() {
            return Err(AppError::Rejected(format!(
                "another task is in progress in project '{}'",
                self.name
            )));
        }
        if let Some(busy) = self.active_clients().into_iter().find(|c| c.has_pending_task()) {
            return Err(AppError::Rejected(format!(
                "client {} has a pending task",
                busy.identity()
            )));
        }
        Ok(())
    }

    /// Document describing the active clients as they will be after the
    /// save round starts.
    #[must_use]
    pub fn build_document(&self, svc: &Services) -> ProjectDocument {
        let clients = self
            .active_clients()
            .into_iter()
            .map(|client| {
                let patches = if svc.patches.contains(client.id()) {
                    svc.patches.snapshot(client.id())
                } else {
                    client.patches.clone()
                };
                let mut element = ClientElement::capture(client, &patches);
                element.flags |= ClientFlags::SAVED.bits();
                element
            })
            .collect();

        ProjectDocument {
            version: DOCUMENT_VERSION.to_owned(),
            name: Some(self.name.clone()),
            description: self.description.clone(),
            clients,
        }
    }

    /// Drop every lost client along with its data directory.
    pub fn purge_lost_clients(&mut self) {
        for id in self.member_ids(crate::models::client::Membership::Lost) {
            if let Some(mut client) = self.take(id) {
                client.close_store();
                if let Some(path) = &client.data_path {
                    if path.exists() {
                        dirs::remove_dir(path);
                    }
                }
                info!(client = %client, "purged lost client");
            }
        }
    }

    /// Move the project directory to `new_dir`.
    ///
    /// An empty path or the current directory is a no-op. Stores are closed
    /// around the rename and reopened at the new location.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rejected` if `new_dir` already exists or cannot be
    /// inspected, and `AppError::Io` if the rename fails; in that case the
    /// project keeps its old directory and its stores stay closed.
    pub fn move_to(&mut self, svc: &mut Services, new_dir: &Path) -> Result<()> {
        if new_dir.as_os_str().is_empty() || new_dir == self.directory {
            return Ok(());
        }

        match fs::symlink_metadata(new_dir) {
            Ok(_) => {
                return Err(AppError::Rejected(format!(
                    "cannot move project to {}: target exists",
                    new_dir.display()
                )))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(AppError::Rejected(format!(
                    "cannot move project to {}: {err}",
                    new_dir.display()
                )))
            }
        }

        for client in self.clients.values_mut().filter(|c| c.is_active()) {
            client.close_store();
        }

        if self.directory.exists() {
            if let Err(err) = fs::rename(&self.directory, new_dir) {
                error!(project = %self.name, %err, "cannot move project to {}", new_dir.display());
                return Err(AppError::Io(format!(
                    "cannot move project to {}: {err}",
                    new_dir.display()
                )));
            }
        }

        let old_dir = std::mem::replace(&mut self.directory, new_dir.to_path_buf());
        for client in self.clients.values_mut() {
            client.data_path = client
                .data_path
                .take()
                .map(|path| rebase(&path, &old_dir, new_dir));
        }

        let reopen: Vec<_> = self
            .clients
            .values()
            .filter(|c| c.is_active() && c.store.is_some())
            .map(Client::id)
            .collect();
        for id in reopen {
            if let Err(err) = self.ensure_store(id) {
                warn!(client_id = %id, %err, "failed to reopen client store after move");
            }
        }

        info!(
            project = %self.name,
            from = %old_dir.display(),
            to = %new_dir.display(),
            "project moved"
        );
        svc.emit(Signal::ProjectPathChanged {
            project: self.name.clone(),
            directory: new_dir.to_path_buf(),
        });
        Ok(())
    }

    /// Tell every client to quit and destroy all records. A project that
    /// was never saved also loses its directory.
    pub fn unload(&mut self, svc: &mut Services) {
        let span = info_span!("unload_project", project = %self.name);
        let _guard = span.enter();

        svc.emit(Signal::Quit {
            project: self.name.clone(),
        });

        for (id, mut client) in std::mem::take(&mut self.clients) {
            if client.is_active() {
                svc.patches.remove(id);
            }
            client.close_store();
            if let Some(endpoint) = client.endpoint.take() {
                svc.bus.detach(&endpoint);
            }
        }
        self.task = super::ProjectTask::default();
        info!("project unloaded");

        if self.document.is_none() && self.directory.exists() {
            info!(
                directory = %self.directory.display(),
                "removing directory of closed newborn project"
            );
            dirs::remove_dir(&self.directory);
        }
    }
}

fn rebase(path: &Path, old_root: &Path, new_root: &Path) -> PathBuf {
    path.strip_prefix(old_root)
        .map_or_else(|_| path.to_path_buf(), |rel| new_root.join(rel))
}
