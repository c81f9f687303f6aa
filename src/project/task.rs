//! Save/load rounds and progress aggregation.
//!
//! A project runs at most one task at a time. A save round asks every
//! active client to save and waits for each one to report completion; a
//! load round waits for every relaunched client to restore. Clients report
//! progress asynchronously; the project folds those reports into a single
//! percentage that stays below 100 until the last client completes.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Project;
use crate::bus::{ClientRequest, Signal};
use crate::models::client::{ClientFlags, TaskType};
use crate::persistence::store::Store;
use crate::services::Services;
use crate::{AppError, Result};

/// Highest aggregate progress reported before a round completes.
pub const MAX_REPORTED_PROGRESS: u32 = 99;

/// Kind of project-level task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectTaskKind {
    /// Nothing running.
    #[default]
    Idle,
    /// Waiting for clients to save.
    Save,
    /// Waiting for clients to restore.
    Load,
}

impl ProjectTaskKind {
    /// Lower-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Save => "save",
            Self::Load => "load",
        }
    }
}

/// Aggregation counters of the running project task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectTask {
    /// Kind of task.
    pub kind: ProjectTaskKind,
    /// Clients taking part.
    pub total: u32,
    /// Sum of the participants' last progress values.
    pub progress: u32,
    /// Participants yet to complete.
    pub pending: u32,
    /// When the task started.
    pub started_at: Option<Instant>,
}

impl ProjectTask {
    /// Whether no task is running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.kind == ProjectTaskKind::Idle
    }

    /// Whether the task has run for at least `timeout` at `now`.
    #[must_use]
    pub fn is_overdue(&self, now: Instant, timeout: Duration) -> bool {
        !self.is_idle()
            && self
                .started_at
                .is_some_and(|started| now.saturating_duration_since(started) >= timeout)
    }

    fn begin(kind: ProjectTaskKind, participants: u32) -> Self {
        Self {
            kind,
            total: participants,
            progress: 0,
            pending: participants,
            started_at: Some(Instant::now()),
        }
    }
}

impl Project {
    /// Start a save round across every active client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rejected` if a project task is running or any
    /// active client still has a pending task. Nothing changes in that case.
    pub fn begin_save_round(&mut self, svc: &mut Services) -> Result<u64> {
        if !self.task.is_idle() {
            return Err(AppError::Rejected(format!(
                "project '{}' is already running a {} task",
                self.name,
                self.task.kind.as_str()
            )));
        }
        if let Some(busy) = self.active_clients().into_iter().find(|c| c.has_pending_task()) {
            return Err(AppError::Rejected(format!(
                "client {} has a pending task, not sending save request",
                busy.identity()
            )));
        }

        let task_id = svc.next_task_id();
        self.task = ProjectTask::begin(ProjectTaskKind::Save, 0);

        debug!(project = %self.name, task_id, "signalling clients to save");
        svc.emit(Signal::Save {
            project: self.name.clone(),
            task_id,
        });

        for client in self.clients.values_mut().filter(|c| c.is_active()) {
            client.pending_task = task_id;
            client.task_type = if client.has_config_file() {
                TaskType::SaveFile
            } else {
                TaskType::SaveDataSet
            };
            client.task_progress = 0;
            client.flags.insert(ClientFlags::SAVED);
            self.task.total += 1;
        }
        self.task.pending = self.task.total;

        if self.task.total == 0 {
            self.task = ProjectTask::default();
        }
        Ok(task_id)
    }

    /// Start a load round expecting `participants` clients to restore.
    pub fn begin_load_round(&mut self, participants: u32) {
        if participants == 0 {
            return;
        }
        self.task = ProjectTask::begin(ProjectTaskKind::Load, participants);
        info!(project = %self.name, participants, "waiting for clients to restore");
    }

    /// Ask client `id` to restore its state from files.
    pub fn request_load_file(&mut self, svc: &mut Services, id: Uuid) {
        let task_id = svc.next_task_id();
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let Some(data_path) = client.data_path.clone() else {
            warn!(client_id = %id, "client has no data path; not sending load request");
            return;
        };

        debug!(client = %client, task_id, "requesting client to load data from disk");
        client.pending_task = task_id;
        client.task_type = TaskType::LoadFile;
        client.task_progress = 0;
        let endpoint = client.endpoint.clone();

        self.deliver(svc, id, endpoint, ClientRequest::Load { task_id, data_path });
    }

    /// Send client `id` its stored data set. An empty store has nothing to
    /// restore and completes the client at once.
    pub fn request_load_data_set(&mut self, svc: &mut Services, id: Uuid) {
        if let Err(err) = self.ensure_store(id) {
            warn!(client_id = %id, %err, "could not open client's store; not sending data set");
            return;
        }

        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let configs = client
            .store
            .as_ref()
            .map(|store| store.entries().clone())
            .unwrap_or_default();

        if configs.is_empty() {
            debug!(client = %client, "no data found in store");
            client.task_type = TaskType::LoadDataSet;
            self.client_task_completed(svc, id);
            return;
        }

        let task_id = svc.next_task_id();
        debug!(client = %client, task_id, keys = configs.len(), "sending client its data set");
        client.pending_task = task_id;
        client.task_type = TaskType::LoadDataSet;
        client.task_progress = 0;
        let endpoint = client.endpoint.clone();

        self.deliver(svc, id, endpoint, ClientRequest::LoadDataSet { task_id, configs });
    }

    fn deliver(
        &mut self,
        svc: &mut Services,
        id: Uuid,
        endpoint: Option<String>,
        request: ClientRequest,
    ) {
        let result = match endpoint {
            Some(endpoint) => svc.bus.call(&endpoint, request),
            None => Err(AppError::Delivery(format!("client {id} has no endpoint"))),
        };
        if let Err(err) = result {
            warn!(client_id = %id, %err, "client request failed");
            self.client_request_failed(id);
        }
    }

    /// A request to client `id` could not be delivered: drop its task
    /// without touching the project counters.
    pub fn client_request_failed(&mut self, id: Uuid) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.reset_task();
        }
    }

    /// Record `percent` as client `id`'s progress and signal the new
    /// aggregate.
    pub fn client_progress(&mut self, svc: &mut Services, id: Uuid, percent: u8) {
        let percent = percent.min(100);
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };

        if client.task_progress != 0 {
            self.task.progress = self
                .task
                .progress
                .saturating_sub(u32::from(client.task_progress));
        }
        self.task.progress += u32::from(percent);
        client.task_progress = percent;

        if self.task.total == 0 {
            return;
        }

        let aggregate = (self.task.progress / self.task.total).min(MAX_REPORTED_PROGRESS);
        svc.emit(Signal::Progress {
            percent: u8::try_from(aggregate).unwrap_or(u8::MAX),
        });
    }

    /// Client `id` finished its task. When it was the last one, the
    /// project task ends and saved or loaded is signalled according to the
    /// client's task kind.
    pub fn client_task_completed(&mut self, svc: &mut Services, id: Uuid) {
        self.client_progress(svc, id, 100);

        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let task_type = client.task_type;
        client.reset_task();

        if self.task.pending == 0 {
            return;
        }
        self.task.pending -= 1;
        if self.task.pending > 0 {
            return;
        }

        self.task = ProjectTask::default();
        if task_type.is_save() {
            info!(project = %self.name, "project saved");
            svc.emit(Signal::ProjectSaved {
                project: self.name.clone(),
            });
        } else if task_type.is_load() {
            info!(project = %self.name, "project loaded");
            svc.emit(Signal::ProjectLoaded {
                project: self.name.clone(),
            });
        } else {
            return;
        }

        self.set_modified(svc, false);
        svc.emit(Signal::Progress { percent: 0 });
    }

    /// Handle a progress report from client `id` for `task_id`. 100 or
    /// more means the task completed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown client and
    /// `AppError::Rejected` if `task_id` is not the client's pending task.
    pub fn task_progressed(
        &mut self,
        svc: &mut Services,
        id: Uuid,
        task_id: u64,
        percent: u8,
    ) -> Result<()> {
        let Some(client) = self.clients.get(&id) else {
            return Err(AppError::NotFound(format!("client {id}")));
        };
        if !client.has_pending_task() || client.pending_task != task_id {
            return Err(AppError::Rejected(format!(
                "client {} reported progress for task {task_id}, expected {}",
                client.identity(),
                client.pending_task
            )));
        }

        if percent >= 100 {
            self.client_task_completed(svc, id);
        } else {
            self.client_progress(svc, id, percent);
        }
        Ok(())
    }

    /// Store the data set client `id` sent for save task `task_id` and
    /// complete its task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown client,
    /// `AppError::Rejected` if the client is not saving a data set for
    /// `task_id`, and `AppError::Store` if its store cannot be opened.
    pub fn client_data_set(
        &mut self,
        svc: &mut Services,
        id: Uuid,
        task_id: u64,
        configs: BTreeMap<String, Value>,
    ) -> Result<()> {
        let Some(client) = self.clients.get(&id) else {
            return Err(AppError::NotFound(format!("client {id}")));
        };
        if client.task_type != TaskType::SaveDataSet || client.pending_task != task_id {
            return Err(AppError::Rejected(format!(
                "client {} is not saving a data set for task {task_id}",
                client.identity()
            )));
        }

        self.ensure_store(id)?;
        if let Some(store) = self.clients.get_mut(&id).and_then(|c| c.store.as_mut()) {
            store.replace(configs);
            if let Err(err) = store.write() {
                warn!(client_id = %id, %err, "failed to write client data set");
            }
        }

        self.client_task_completed(svc, id);
        Ok(())
    }

    /// Abandon the running project task: every client still owing a
    /// report is reset and the counters cleared. Returns `false` when no
    /// task was running.
    pub fn force_complete_task(&mut self, svc: &mut Services) -> bool {
        if self.task.is_idle() {
            return false;
        }

        warn!(
            project = %self.name,
            task = self.task.kind.as_str(),
            pending = self.task.pending,
            "abandoning project task"
        );
        for client in self.clients.values_mut().filter(|c| c.has_pending_task()) {
            client.reset_task();
        }
        self.task = ProjectTask::default();

        svc.emit(Signal::TaskTimedOut {
            project: self.name.clone(),
        });
        svc.emit(Signal::Progress { percent: 0 });
        true
    }

    /// Open client `id`'s store if it is not open yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown client and
    /// `AppError::Store` if the store cannot be opened.
    pub fn ensure_store(&mut self, id: Uuid) -> Result<()> {
        let dir = self.client_config_dir(id);
        let Some(client) = self.clients.get_mut(&id) else {
            return Err(AppError::NotFound(format!("client {id}")));
        };

        match client.store.as_mut() {
            Some(store) if store.is_open() => Ok(()),
            Some(store) => store.open(dir),
            None => {
                client.store = Some(Store::open_at(dir)?);
                Ok(())
            }
        }
    }
}
