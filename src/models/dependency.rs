//! Per-client prerequisite tracking.

use uuid::Uuid;

/// Prerequisite clients of a client.
///
/// `declared` is what the user configured and what gets persisted;
/// `unsatisfied` is the runtime subset still waiting for the referenced
/// client to become active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    declared: Vec<Uuid>,
    unsatisfied: Vec<Uuid>,
}

impl DependencySet {
    /// Set restored from disk; every declared id starts unsatisfied.
    #[must_use]
    pub fn from_declared(ids: impl IntoIterator<Item = Uuid>) -> Self {
        let mut set = Self::default();
        for id in ids {
            set.add(id);
        }
        set
    }

    /// Declare a new prerequisite. Returns `false` if already declared.
    pub fn add(&mut self, id: Uuid) -> bool {
        if self.declared.contains(&id) {
            return false;
        }
        self.declared.push(id);
        self.unsatisfied.push(id);
        true
    }

    /// Drop a prerequisite entirely. Returns `false` if it was not declared.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.declared.len();
        self.declared.retain(|dep| *dep != id);
        self.unsatisfied.retain(|dep| *dep != id);
        before != self.declared.len()
    }

    /// Mark `id` as active. Returns `true` only when this call removed it
    /// from the unsatisfied set.
    pub fn satisfy(&mut self, id: Uuid) -> bool {
        let before = self.unsatisfied.len();
        self.unsatisfied.retain(|dep| *dep != id);
        before != self.unsatisfied.len()
    }

    /// Whether nothing is left to wait for.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.unsatisfied.is_empty()
    }

    /// Whether no prerequisite was ever declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Declared prerequisites in insertion order.
    #[must_use]
    pub fn declared(&self) -> &[Uuid] {
        &self.declared
    }

    /// Prerequisites still awaited.
    #[must_use]
    pub fn unsatisfied(&self) -> &[Uuid] {
        &self.unsatisfied
    }

    /// Move every entry out of `self`, leaving it empty.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
