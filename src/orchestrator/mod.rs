//! Daemon orchestration.
//!
//! Covers the project registry, the command set, the single dispatch loop
//! and the watchdog that drives task timeouts.

pub mod command;
pub mod daemon;
pub mod dispatch;
pub mod task_watchdog;
