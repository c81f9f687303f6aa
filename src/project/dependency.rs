//! Deferred launches of clients waiting on prerequisite clients.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Project;
use crate::services::Services;
use crate::{AppError, Result};

impl Project {
    /// Client `resolved` became active: drop it from every lost client's
    /// unsatisfied set and launch each client whose set just emptied.
    /// Returns the ids that were launched.
    pub fn satisfy_dependency(&mut self, svc: &mut Services, resolved: Uuid) -> Vec<Uuid> {
        let mut ready = Vec::new();
        for client in self.clients.values_mut().filter(|c| !c.is_active()) {
            if client.dependencies.satisfy(resolved) && client.dependencies.is_satisfied() {
                debug!(client = %client, "dependencies are now satisfied");
                ready.push((client.admitted, client.id()));
            }
        }
        ready.sort_unstable();

        let mut launched = Vec::new();
        for (_, id) in ready {
            match self.launch_client(svc, id) {
                Ok(pid) => {
                    info!(client_id = %id, pid, "launched client after its dependencies resolved");
                    launched.push(id);
                }
                Err(err) => warn!(client_id = %id, %err, "failed to launch client"),
            }
        }
        launched
    }

    /// Make client `id` wait for `dependency` on the next load.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if either client is unknown and
    /// `AppError::Rejected` for a self-dependency or a duplicate.
    pub fn add_dependency(&mut self, svc: &mut Services, id: Uuid, dependency: Uuid) -> Result<()> {
        if id == dependency {
            return Err(AppError::Rejected(format!(
                "client {id} cannot depend on itself"
            )));
        }
        if !self.clients.contains_key(&dependency) {
            return Err(AppError::NotFound(format!("client {dependency}")));
        }
        let Some(client) = self.clients.get_mut(&id) else {
            return Err(AppError::NotFound(format!("client {id}")));
        };

        if !client.dependencies.add(dependency) {
            return Err(AppError::Rejected(format!(
                "client {id} already depends on {dependency}"
            )));
        }
        // A running prerequisite is already satisfied for a running client.
        if client.is_active() {
            client.dependencies.satisfy(dependency);
        }

        info!(client_id = %id, %dependency, "dependency added");
        self.set_modified(svc, true);
        Ok(())
    }

    /// Stop client `id` waiting for `dependency`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the client is unknown or does not
    /// depend on `dependency`.
    pub fn remove_dependency(
        &mut self,
        svc: &mut Services,
        id: Uuid,
        dependency: Uuid,
    ) -> Result<()> {
        let Some(client) = self.clients.get_mut(&id) else {
            return Err(AppError::NotFound(format!("client {id}")));
        };
        if !client.dependencies.remove(dependency) {
            return Err(AppError::NotFound(format!(
                "client {id} does not depend on {dependency}"
            )));
        }

        info!(client_id = %id, %dependency, "dependency removed");
        self.set_modified(svc, true);
        Ok(())
    }
}
