//! Display names for clients.
//!
//! Names are unique among every client of a project, active or lost. A
//! client without a requested name is named after its class, with a
//! two-digit counter appended when the bare class is taken.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Project;
use crate::bus::Signal;
use crate::services::Services;
use crate::{AppError, Result};

/// Highest counter appended to a class name.
pub const MAX_NAME_SUFFIX: u8 = 99;

impl Project {
    /// Whether a client other than `except` holds `name`.
    #[must_use]
    pub fn name_taken(&self, name: &str, except: Uuid) -> bool {
        self.clients
            .values()
            .any(|client| client.id() != except && client.name.as_deref() == Some(name))
    }

    /// First free name derived from `class`: the class itself, then
    /// `"<class> 01"` through `"<class> 99"`.
    #[must_use]
    pub fn unique_client_name(&self, class: &str, except: Uuid) -> Option<String> {
        if !self.name_taken(class, except) {
            return Some(class.to_owned());
        }

        (1..=MAX_NAME_SUFFIX)
            .map(|i| format!("{class} {i:02}"))
            .find(|candidate| !self.name_taken(candidate, except))
    }

    /// Give client `id` a name.
    ///
    /// `requested` is used verbatim when free; otherwise a name is derived
    /// from the client's class. Renaming an already-named client signals
    /// the change. Returns `false` if no free name exists, leaving the
    /// client as it was.
    pub fn assign_name(&mut self, svc: &mut Services, id: Uuid, requested: Option<&str>) -> bool {
        let Some(client) = self.clients.get(&id) else {
            return false;
        };

        let resolved = match requested {
            Some(name) if !name.is_empty() && !self.name_taken(name, id) => Some(name.to_owned()),
            Some(name) if !name.is_empty() => {
                debug!(client_id = %id, name, "requested name is taken, deriving one");
                self.unique_client_name(&client.class, id)
            }
            _ => self.unique_client_name(&client.class, id),
        };

        let Some(resolved) = resolved else {
            warn!(
                client_id = %id,
                class = %client.class,
                "could not create a unique name; are {MAX_NAME_SUFFIX} clients of this class open?"
            );
            return false;
        };

        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        if client.name.as_deref() == Some(resolved.as_str()) {
            return true;
        }

        let renamed = client.name.is_some();
        client.name = Some(resolved.clone());
        info!(client_id = %id, name = %resolved, "client named");

        if renamed {
            svc.emit(Signal::ClientNameChanged {
                client_id: id,
                name: resolved,
            });
        }
        true
    }

    /// Rename client `id` on request.
    ///
    /// Renaming to the current name is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown client and
    /// `AppError::Rejected` if another client holds `name` or it is empty.
    pub fn rename_client(&mut self, svc: &mut Services, id: Uuid, name: &str) -> Result<()> {
        let Some(client) = self.clients.get(&id) else {
            return Err(AppError::NotFound(format!("client {id}")));
        };

        if client.name.as_deref() == Some(name) {
            return Ok(());
        }
        if name.is_empty() {
            return Err(AppError::Rejected("client name must not be empty".into()));
        }
        if self.name_taken(name, id) {
            return Err(AppError::Rejected(format!(
                "client name '{name}' is already taken in project '{}'",
                self.name
            )));
        }

        if let Some(client) = self.clients.get_mut(&id) {
            client.name = Some(name.to_owned());
        }
        info!(client_id = %id, name, "client renamed");
        svc.emit(Signal::ClientNameChanged {
            client_id: id,
            name: name.to_owned(),
        });
        Ok(())
    }
}
