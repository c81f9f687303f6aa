//! Collaborators every project operation works through.
//!
//! A [`Services`] value replaces what would otherwise be daemon-wide
//! globals: the bus, the process launcher, the live patch registry and the
//! task-id generator. Project operations borrow it mutably for the duration
//! of one dispatch.

pub mod launcher;
pub mod patches;

use crate::bus::{Bus, Signal};

use self::launcher::Launcher;
use self::patches::PatchRegistry;

/// Context passed to every project operation.
pub struct Services {
    /// Outbound signals and client requests.
    pub bus: Box<dyn Bus>,
    /// Starts client processes.
    pub launcher: Box<dyn Launcher>,
    /// Live backend connections per client.
    pub patches: PatchRegistry,
    task_iter: u64,
}

impl Services {
    /// Bundle the collaborators.
    #[must_use]
    pub fn new(bus: Box<dyn Bus>, launcher: Box<dyn Launcher>) -> Self {
        Self {
            bus,
            launcher,
            patches: PatchRegistry::default(),
            task_iter: 0,
        }
    }

    /// Next task identifier; never 0 and strictly increasing.
    pub fn next_task_id(&mut self) -> u64 {
        self.task_iter += 1;
        self.task_iter
    }

    /// Last task identifier handed out.
    #[must_use]
    pub fn last_task_id(&self) -> u64 {
        self.task_iter
    }

    /// Shorthand for `self.bus.emit`.
    pub fn emit(&mut self, signal: Signal) {
        self.bus.emit(signal);
    }
}
