//! Daemon-wide registry of projects and client routing.
//!
//! The [`Daemon`] owns every loaded [`Project`] plus the summaries of the
//! projects found on disk, and routes client events to the project that
//! holds the client. All of it runs on the single dispatch task.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::bus::{Mailbox, Signal};
use crate::config::GlobalConfig;
use crate::models::client::Announcement;
use crate::models::patch::PatchSet;
use crate::models::view::{ProjectInfo, ProjectSummary};
use crate::persistence::dirs;
use crate::project::Project;
use crate::services::Services;
use crate::{AppError, Result};

/// Owner of all projects.
pub struct Daemon {
    config: GlobalConfig,
    svc: Services,
    projects: Vec<Project>,
    available: BTreeMap<String, ProjectSummary>,
}

impl Daemon {
    /// Create a daemon with no project loaded.
    #[must_use]
    pub fn new(config: GlobalConfig, svc: Services) -> Self {
        Self {
            config,
            svc,
            projects: Vec::new(),
            available: BTreeMap::new(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Collaborators.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.svc
    }

    /// Mutable collaborators.
    pub fn services_mut(&mut self) -> &mut Services {
        &mut self.svc
    }

    /// Loaded projects, oldest first.
    #[must_use]
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Loaded project by name.
    #[must_use]
    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name() == name)
    }

    fn project_mut(&mut self, name: &str) -> Result<&mut Project> {
        self.projects
            .iter_mut()
            .find(|p| p.name() == name)
            .ok_or_else(|| AppError::NotFound(format!("project '{name}' is not loaded")))
    }

    fn project_index(&self, name: &str) -> Result<usize> {
        self.projects
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| AppError::NotFound(format!("project '{name}' is not loaded")))
    }

    /// Loaded project holding client `id`, active or lost.
    #[must_use]
    pub fn project_of(&self, id: Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.client(id).is_some())
    }

    fn route(&mut self, id: Uuid) -> Result<(&mut Project, &mut Services)> {
        let project = self
            .projects
            .iter_mut()
            .find(|p| p.client(id).is_some())
            .ok_or_else(|| AppError::NotFound(format!("client {id}")))?;
        Ok((project, &mut self.svc))
    }

    fn name_in_use(&self, name: &str) -> bool {
        self.available.contains_key(name) || self.project(name).is_some()
    }

    /// Summaries of the projects found on disk, by name.
    #[must_use]
    pub fn list_projects(&self) -> Vec<ProjectSummary> {
        self.available.values().cloned().collect()
    }

    /// Snapshot of the loaded project `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the project is not loaded.
    pub fn project_info(&self, name: &str) -> Result<ProjectInfo> {
        self.project(name)
            .map(Project::info)
            .ok_or_else(|| AppError::NotFound(format!("project '{name}' is not loaded")))
    }

    /// Snapshots of every loaded project.
    #[must_use]
    pub fn loaded_projects(&self) -> Vec<ProjectInfo> {
        self.projects.iter().map(Project::info).collect()
    }

    /// Rebuild the list of projects on disk. Directories without a readable
    /// document are skipped. Returns the number of projects found.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the projects directory cannot be listed.
    pub fn scan_projects(&mut self) -> Result<usize> {
        let root = self.config.projects_dir.clone();
        let entries = fs::read_dir(&root)
            .map_err(|err| AppError::Io(format!("cannot list {}: {err}", root.display())))?;

        let mut found = BTreeMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match Project::peek(&path) {
                Ok(summary) => {
                    found.insert(summary.name.clone(), summary);
                }
                Err(err) => debug!(directory = %path.display(), %err, "not a project"),
            }
        }

        // Loaded projects win over what is on disk.
        for project in &self.projects {
            if let Some(summary) = self.available.get(project.name()) {
                found.insert(project.name().to_owned(), summary.clone());
            }
        }

        info!(count = found.len(), root = %root.display(), "scanned projects");
        self.available = found;
        Ok(self.available.len())
    }

    /// Create an empty project under the projects directory and return its
    /// name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rejected` if `name` is invalid or already used and
    /// `AppError::Io` if the directory cannot be created.
    pub fn new_project(&mut self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(requested) => {
                validate_project_name(requested)?;
                if self.name_in_use(requested) || self.config.project_dir(requested).exists() {
                    return Err(AppError::Rejected(format!(
                        "project name '{requested}' is already in use"
                    )));
                }
                requested.to_owned()
            }
            None => self.unused_project_name(),
        };

        let directory = self.config.project_dir(&name);
        dirs::create_dir(&directory)?;

        info!(project = %name, directory = %directory.display(), "new project");
        self.svc.emit(Signal::ProjectAppeared {
            project: name.clone(),
            directory: directory.clone(),
        });
        self.projects.push(Project::new(name.clone(), directory));
        Ok(name)
    }

    fn unused_project_name(&self) -> String {
        let base = self.config.default_project_name.as_str();
        (1_u32..)
            .map(|n| {
                if n == 1 {
                    base.to_owned()
                } else {
                    format!("{base} {n}")
                }
            })
            .find(|candidate| {
                !self.name_in_use(candidate) && !self.config.project_dir(candidate).exists()
            })
            .unwrap_or_else(|| format!("{base} {}", Uuid::new_v4()))
    }

    /// Load the project `name` from disk. Every persisted client starts
    /// lost; those waiting on nothing are launched right away and a load
    /// round waits for all of them to restore.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Rejected` if the project is already loaded,
    /// `AppError::NotFound` if no such project is on disk and the
    /// document errors of [`Project::open`].
    pub fn open_project(&mut self, name: &str) -> Result<()> {
        let span = info_span!("open_project", project = %name);
        let _guard = span.enter();

        if self.project(name).is_some() {
            return Err(AppError::Rejected(format!(
                "project '{name}' is already loaded"
            )));
        }
        if !self.available.contains_key(name) {
            self.scan_projects()?;
        }
        let Some(summary) = self.available.get(name) else {
            return Err(AppError::NotFound(format!("project '{name}'")));
        };

        let mut project = Project::open(&summary.directory)?;
        let participants = u32::try_from(project.lost_clients().len()).unwrap_or(u32::MAX);
        project.begin_load_round(participants);

        self.svc.emit(Signal::ProjectAppeared {
            project: project.name().to_owned(),
            directory: project.directory().to_path_buf(),
        });
        let launched = project.launch_ready_clients(&mut self.svc);
        info!(
            clients = participants,
            launched = launched.len(),
            "project opened"
        );
        self.projects.push(project);
        Ok(())
    }

    /// Unload the project `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the project is not loaded.
    pub fn close_project(&mut self, name: &str) -> Result<()> {
        let index = self.project_index(name)?;
        let mut project = self.projects.remove(index);
        project.unload(&mut self.svc);

        if project.document().is_none() {
            self.available.remove(name);
        }
        self.svc.emit(Signal::ProjectDisappeared {
            project: name.to_owned(),
        });
        Ok(())
    }

    /// Save the project `name` and list it as loadable.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Project::save`].
    pub fn save_project(&mut self, name: &str) -> Result<()> {
        let index = self.project_index(name)?;
        let project = &mut self.projects[index];
        project.save(&mut self.svc)?;

        let summary = ProjectSummary {
            name: project.name().to_owned(),
            directory: project.directory().to_path_buf(),
            description: project.description().to_owned(),
            last_modified: dirs::modified_time(project.directory()),
        };
        self.available.insert(summary.name.clone(), summary);
        Ok(())
    }

    /// Save every loaded project, returning the ones that failed.
    pub fn save_all(&mut self) -> Vec<(String, AppError)> {
        let names: Vec<String> = self.projects.iter().map(|p| p.name().to_owned()).collect();
        let mut failed = Vec::new();
        for name in names {
            if let Err(err) = self.save_project(&name) {
                warn!(project = %name, %err, "save failed");
                failed.push((name, err));
            }
        }
        failed
    }

    /// Move the directory of project `name`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Project::move_to`].
    pub fn move_project(&mut self, name: &str, directory: &Path) -> Result<()> {
        let index = self.project_index(name)?;
        self.projects[index].move_to(&mut self.svc, directory)?;

        let moved_to = self.projects[index].directory().to_path_buf();
        if let Some(summary) = self.available.get_mut(name) {
            summary.directory = moved_to;
        }
        Ok(())
    }

    /// Rename project `name`, keeping names unique across the daemon.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the project is not loaded and
    /// `AppError::Rejected` if `new_name` is invalid or held by another
    /// project.
    pub fn rename_project(&mut self, name: &str, new_name: &str) -> Result<()> {
        validate_project_name(new_name)?;
        let index = self.project_index(name)?;
        if new_name != name && self.name_in_use(new_name) {
            return Err(AppError::Rejected(format!(
                "project name '{new_name}' is already in use"
            )));
        }

        self.projects[index].rename(&mut self.svc, new_name);
        if let Some(mut summary) = self.available.remove(name) {
            new_name.clone_into(&mut summary.name);
            self.available.insert(new_name.to_owned(), summary);
        }
        Ok(())
    }

    /// Replace the description of project `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the project is not loaded.
    pub fn set_description(&mut self, name: &str, description: &str) -> Result<()> {
        let index = self.project_index(name)?;
        self.projects[index].set_description(&mut self.svc, description);
        Ok(())
    }

    /// Replace the notes of project `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the project is not loaded.
    pub fn set_notes(&mut self, name: &str, notes: &str) -> Result<()> {
        let index = self.project_index(name)?;
        self.projects[index].set_notes(&mut self.svc, notes);
        Ok(())
    }

    /// Register a process as a client. It joins `project` when given, else
    /// the most recently opened project, else a new one. When `mailbox` is
    /// set, requests for the client are delivered through it.
    ///
    /// Returns the project joined and the client id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the requested project is not loaded
    /// and the errors of [`Project::add_client`].
    pub fn register_client(
        &mut self,
        project: Option<&str>,
        announcement: Announcement,
        mailbox: Option<Mailbox>,
    ) -> Result<(String, Uuid)> {
        let index = match project {
            Some(name) => self.project_index(name)?,
            None if self.projects.is_empty() => {
                let name = self.new_project(None)?;
                self.project_index(&name)?
            }
            None => self.projects.len() - 1,
        };

        let endpoint = announcement.endpoint.clone();
        if let (Some(endpoint), Some(mailbox)) = (endpoint.as_deref(), mailbox) {
            self.svc.bus.attach(endpoint, mailbox);
        }

        let project = &mut self.projects[index];
        let id = match project.add_client(&mut self.svc, announcement) {
            Ok(id) => id,
            Err(err) => {
                if let Some(endpoint) = endpoint.as_deref() {
                    self.svc.bus.detach(endpoint);
                }
                return Err(err);
            }
        };

        project.satisfy_dependency(&mut self.svc, id);
        Ok((project.name().to_owned(), id))
    }

    /// The process of client `id` went away.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Project::lose_client`].
    pub fn client_lost(&mut self, id: Uuid) -> Result<()> {
        let (project, svc) = self.route(id)?;
        project.lose_client(svc, id)
    }

    /// Progress report from client `id`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Project::task_progressed`].
    pub fn client_progress(&mut self, id: Uuid, task_id: u64, percent: u8) -> Result<()> {
        let (project, svc) = self.route(id)?;
        project.task_progressed(svc, id, task_id, percent)
    }

    /// Data set sent by client `id` for a save.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Project::client_data_set`].
    pub fn client_data_set(
        &mut self,
        id: Uuid,
        task_id: u64,
        configs: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        let (project, svc) = self.route(id)?;
        project.client_data_set(svc, id, task_id, configs)
    }

    /// A request to client `id` could not be delivered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown client.
    pub fn client_request_failed(&mut self, id: Uuid) -> Result<()> {
        let (project, _) = self.route(id)?;
        project.client_request_failed(id);
        Ok(())
    }

    /// Record the live backend connections of client `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown client and
    /// `AppError::Rejected` if it is not running.
    pub fn set_client_patches(&mut self, id: Uuid, sets: Vec<PatchSet>) -> Result<()> {
        let (project, svc) = self.route(id)?;
        if !project.has_active_client(id) {
            return Err(AppError::Rejected(format!("client {id} is not running")));
        }
        svc.patches.report(id, sets);
        project.set_modified(svc, true);
        Ok(())
    }

    /// Rename client `id`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Project::rename_client`].
    pub fn rename_client(&mut self, id: Uuid, name: &str) -> Result<()> {
        let (project, svc) = self.route(id)?;
        project.rename_client(svc, id, name)
    }

    /// Make client `id` depend on `dependency`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Project::add_dependency`].
    pub fn add_dependency(&mut self, id: Uuid, dependency: Uuid) -> Result<()> {
        let (project, svc) = self.route(id)?;
        project.add_dependency(svc, id, dependency)
    }

    /// Drop a dependency of client `id`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Project::remove_dependency`].
    pub fn remove_dependency(&mut self, id: Uuid, dependency: Uuid) -> Result<()> {
        let (project, svc) = self.route(id)?;
        project.remove_dependency(svc, id, dependency)
    }

    /// Force-complete every project task running longer than the configured
    /// timeout. Returns the projects whose task was abandoned.
    pub fn expire_stalled_tasks(&mut self, now: Instant) -> Vec<String> {
        let Some(timeout) = self.config.tasks.timeout() else {
            return Vec::new();
        };

        let mut expired = Vec::new();
        for project in &mut self.projects {
            if project.task().is_overdue(now, timeout) && project.force_complete_task(&mut self.svc)
            {
                expired.push(project.name().to_owned());
            }
        }
        expired
    }

    /// Collect launched processes that exited. A lost record whose process
    /// died before registering forgets the pid so it cannot be matched by
    /// a recycled one.
    pub fn reap_children(&mut self) {
        for (id, status) in self.svc.launcher.reap() {
            let Some(project) = self.projects.iter_mut().find(|p| p.client(id).is_some()) else {
                continue;
            };
            if let Some(client) = project.client_mut(id).filter(|c| !c.is_active()) {
                warn!(client = %client, ?status, "client exited before registering");
                client.pid = 0;
            }
        }
    }

    /// Unload every project.
    pub fn shutdown(&mut self) {
        info!(projects = self.projects.len(), "unloading all projects");
        for mut project in std::mem::take(&mut self.projects) {
            project.unload(&mut self.svc);
            self.svc.emit(Signal::ProjectDisappeared {
                project: project.name().to_owned(),
            });
        }
    }
}

fn validate_project_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Err(AppError::Rejected(format!("invalid project name '{name}'")));
    }
    if name.contains(['/', '\\']) {
        return Err(AppError::Rejected(format!(
            "project name '{name}' must not contain path separators"
        )));
    }
    Ok(())
}
