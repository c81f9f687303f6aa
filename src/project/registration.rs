//! Client registration, crash-resume matching and client loss.
//!
//! When a process registers, the project first tries to reunite it with a
//! lost record: a record whose launched pid matches, else the oldest lost
//! record of the same class. A resumed client adopts the lost record's id,
//! name, flags, working directory, data path, patches and dependencies, and
//! is asked to restore whatever it saved before. Anything else registers
//! as a brand-new client with a fresh id.

use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use super::{Project, ProjectTaskKind};
use crate::bus::Signal;
use crate::models::client::{Announcement, Client, ClientFlags, Membership, TaskType};
use crate::models::patch::merge_patch_sets;
use crate::persistence::dirs;
use crate::persistence::store::Store;
use crate::services::launcher::LaunchSpec;
use crate::services::Services;
use crate::{AppError, Result};

impl Project {
    /// Register a process as a client of this project, resuming a lost
    /// record when one matches. Returns the id the client ends up with.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rejected` if the resulting id is already present.
    pub fn add_client(&mut self, svc: &mut Services, announcement: Announcement) -> Result<Uuid> {
        let span = info_span!("add_client", project = %self.name, class = %announcement.class);
        let _guard = span.enter();

        match self.find_resume_candidate(&announcement) {
            Some(lost_id) => self.resume_client(svc, announcement, lost_id),
            None => self.new_client(svc, announcement),
        }
    }

    /// Lost record a registering process should resume, if any.
    #[must_use]
    pub fn find_resume_candidate(&self, announcement: &Announcement) -> Option<Uuid> {
        if announcement.flags.contains(ClientFlags::NO_AUTORESUME) {
            return None;
        }

        let lost = self.lost_clients();
        if lost.is_empty() {
            return None;
        }

        // A process we launched ourselves announces with the recorded pid.
        if announcement.pid != 0 {
            if let Some(client) = lost.iter().find(|c| c.pid == announcement.pid) {
                debug!(pid = announcement.pid, client_id = %client.id(), "matched lost client by pid");
                return Some(client.id());
            }
        }

        let by_class = lost.iter().find(|c| c.class == announcement.class);
        match by_class {
            Some(client) => {
                debug!(client_id = %client.id(), "matched lost client by class");
                Some(client.id())
            }
            None => {
                debug!("could not resume client, adding as new client");
                None
            }
        }
    }

    fn new_client(&mut self, svc: &mut Services, announcement: Announcement) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut client = Client::from_announcement(id, announcement);
        let data_path = self.client_dir(id);
        client.data_path = Some(data_path.clone());

        if client.has_config_data_set() {
            match Store::open_at(self.client_config_dir(id)) {
                Ok(store) => client.store = Some(store),
                Err(err) => warn!(client_id = %id, %err, "could not open client store"),
            }
        }

        let class = client.class.clone();
        self.insert(client)?;
        info!(client_id = %id, class, project = %self.name, "added new client");

        if let Err(err) = dirs::create_dir(&data_path) {
            warn!(client_id = %id, %err, "could not create client data directory");
        }

        self.assign_name(svc, id, None);
        self.emit_appeared(svc, id);
        Ok(id)
    }

    fn resume_client(
        &mut self,
        svc: &mut Services,
        announcement: Announcement,
        lost_id: Uuid,
    ) -> Result<Uuid> {
        let Some(mut lost) = self.take(lost_id) else {
            return Err(AppError::NotFound(format!("lost client {lost_id}")));
        };
        debug!(class = %lost.class, "resuming lost client");

        let name = lost.name.take();
        let mut client = Client::from_announcement(lost.id(), announcement);
        client.flags = lost.flags;
        svc.patches
            .restore(lost_id, std::mem::take(&mut lost.patches));
        client.working_dir = std::mem::take(&mut lost.working_dir);
        client.data_path = Some(
            lost.data_path
                .take()
                .unwrap_or_else(|| self.client_dir(lost_id)),
        );
        client.dependencies = lost.dependencies.take();

        if client.has_config_file() || client.has_config_data_set() {
            if let Some(path) = &client.data_path {
                if let Err(err) = dirs::create_dir(path) {
                    warn!(client_id = %lost_id, %err, "could not create client data directory");
                }
            }
        }

        lost.close_store();
        drop(lost);

        if client.has_config_data_set() {
            match Store::open_at(self.client_config_dir(lost_id)) {
                Ok(store) => client.store = Some(store),
                Err(err) => warn!(client_id = %lost_id, %err, "could not open client store"),
            }
        }

        let saved = client.was_saved();
        let file = client.has_config_file();
        let data_set = client.has_config_data_set();
        let restores = saved && (file || data_set);
        self.insert(client)?;

        if restores && file {
            self.request_load_file(svc, lost_id);
        } else if restores {
            self.request_load_data_set(svc, lost_id);
        } else {
            debug!(client_id = %lost_id, "client has no data to load");
        }

        self.assign_name(svc, lost_id, name.as_deref());
        info!(client_id = %lost_id, project = %self.name, "resumed client");
        self.emit_appeared(svc, lost_id);

        // Nothing to restore counts as an immediately finished restore.
        if !restores {
            if self.task.kind == ProjectTaskKind::Load {
                if let Some(client) = self.clients.get_mut(&lost_id) {
                    client.task_type = TaskType::LoadFile;
                }
            }
            self.client_task_completed(svc, lost_id);
        }
        Ok(lost_id)
    }

    fn emit_appeared(&self, svc: &mut Services, id: Uuid) {
        if let Some(client) = self.clients.get(&id) {
            svc.emit(Signal::ClientAppeared {
                client_id: id,
                project: self.name.clone(),
                name: client.name.clone(),
            });
        }
    }

    /// Move an active client to the lost population after its process
    /// went away, keeping what is needed to resume it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown client and
    /// `AppError::Rejected` if the client is already lost.
    pub fn lose_client(&mut self, svc: &mut Services, id: Uuid) -> Result<()> {
        let clients_dir = self.directory.join(dirs::CLIENTS_DIR);
        let Some(client) = self.clients.get_mut(&id) else {
            return Err(AppError::NotFound(format!("client {id}")));
        };
        if !client.is_active() {
            return Err(AppError::Rejected(format!("client {id} is already lost")));
        }

        info!(client = %client, "losing client");

        if client.has_config_data_set() {
            if let Some(mut store) = client.store.take() {
                if store.is_empty() {
                    let dir = store.dir().to_path_buf();
                    if let Err(err) = store.close() {
                        warn!(client_id = %id, %err, "failed to close store of lost client");
                    }
                    dirs::remove_dir(&dir);
                } else if let Err(err) = store.write().and_then(|()| store.close()) {
                    warn!(client_id = %id, %err, "failed to write store of lost client");
                }
            }
        }

        if client.has_config_data_set() || client.has_config_file() {
            if let Some(path) = &client.data_path {
                dirs::remove_if_empty(path);
            }
            dirs::remove_if_empty(&clients_dir);
        }

        merge_patch_sets(&mut client.patches, svc.patches.remove(id));

        if let Some(endpoint) = client.endpoint.take() {
            svc.bus.detach(&endpoint);
        }
        if client.has_pending_task() {
            warn!(client_id = %id, task_id = client.pending_task, "client lost with a pending task");
            client.reset_task();
        }
        client.pid = 0;
        client.membership = Membership::Lost;

        self.admitted += 1;
        client.admitted = self.admitted;

        svc.emit(Signal::ClientDisappeared {
            client_id: id,
            project: self.name.clone(),
        });
        Ok(())
    }

    /// Start the process of lost client `id`, recording its pid so the
    /// registration that follows resumes this record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown client,
    /// `AppError::Rejected` if the client is active and `AppError::Launch`
    /// if the process cannot be started.
    pub fn launch_client(&mut self, svc: &mut Services, id: Uuid) -> Result<u32> {
        let Some(client) = self.clients.get(&id) else {
            return Err(AppError::NotFound(format!("client {id}")));
        };
        if client.is_active() {
            return Err(AppError::Rejected(format!("client {id} is already running")));
        }

        let spec = LaunchSpec {
            client_id: id,
            project: self.name.clone(),
            class: client.class.clone(),
            working_dir: client.working_dir.clone(),
            argv: client.argv.clone(),
        };
        debug!(client_id = %id, "launching client");
        let pid = svc.launcher.launch(&spec)?;

        if let Some(client) = self.clients.get_mut(&id) {
            client.pid = pid;
        }
        Ok(pid)
    }

    /// Launch every lost client that waits on nothing. Returns the ids
    /// that were started.
    pub fn launch_ready_clients(&mut self, svc: &mut Services) -> Vec<Uuid> {
        let ready: Vec<Uuid> = self
            .lost_clients()
            .into_iter()
            .filter(|client| client.dependencies.is_satisfied())
            .map(Client::id)
            .collect();

        let mut launched = Vec::new();
        for id in ready {
            match self.launch_client(svc, id) {
                Ok(_) => launched.push(id),
                Err(err) => warn!(client_id = %id, %err, "failed to launch client"),
            }
        }
        launched
    }
}
