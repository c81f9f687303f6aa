//! Opaque backend connection blobs.

use serde::{Deserialize, Serialize};

/// Connections of one client within one sound-server backend.
///
/// The daemon never interprets `patches`; it carries them across crashes and
/// persists them so the backend manager can restore the wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSet {
    /// Backend name, e.g. `jack` or `alsa`.
    pub backend: String,
    /// Backend-specific connection descriptions.
    #[serde(default)]
    pub patches: Vec<String>,
}

impl PatchSet {
    /// Build a set for `backend`.
    #[must_use]
    pub fn new(backend: impl Into<String>, patches: Vec<String>) -> Self {
        Self {
            backend: backend.into(),
            patches,
        }
    }
}

/// Append `extra` to `sets`, merging entries of the same backend.
pub fn merge_patch_sets(sets: &mut Vec<PatchSet>, extra: Vec<PatchSet>) {
    for set in extra {
        if let Some(existing) = sets.iter_mut().find(|s| s.backend == set.backend) {
            existing.patches.extend(set.patches);
        } else {
            sets.push(set);
        }
    }
}
