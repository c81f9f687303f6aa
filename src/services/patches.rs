//! Live backend connections reported by running clients.

use std::collections::HashMap;

use uuid::Uuid;

use crate::models::patch::{merge_patch_sets, PatchSet};

/// Per-client connection blobs currently in effect.
#[derive(Debug, Default)]
pub struct PatchRegistry {
    live: HashMap<Uuid, Vec<PatchSet>>,
}

impl PatchRegistry {
    /// Replace the connections of `client_id` for the backends in `sets`.
    pub fn report(&mut self, client_id: Uuid, sets: Vec<PatchSet>) {
        let entry = self.live.entry(client_id).or_default();
        for set in sets {
            entry.retain(|existing| existing.backend != set.backend);
            entry.push(set);
        }
    }

    /// Copy of the connections of `client_id`, for saving.
    #[must_use]
    pub fn snapshot(&self, client_id: Uuid) -> Vec<PatchSet> {
        self.live.get(&client_id).cloned().unwrap_or_default()
    }

    /// Forget `client_id`, returning what it had.
    pub fn remove(&mut self, client_id: Uuid) -> Vec<PatchSet> {
        self.live.remove(&client_id).unwrap_or_default()
    }

    /// Hand carried connections back to the backend for a resumed client.
    pub fn restore(&mut self, client_id: Uuid, sets: Vec<PatchSet>) {
        if sets.is_empty() {
            return;
        }
        merge_patch_sets(self.live.entry(client_id).or_default(), sets);
    }

    /// Whether anything is tracked for `client_id`.
    #[must_use]
    pub fn contains(&self, client_id: Uuid) -> bool {
        self.live.contains_key(&client_id)
    }
}
