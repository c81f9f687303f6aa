#![forbid(unsafe_code)]

//! Session daemon for audio projects.
//!
//! Tracks cooperating client processes, groups them into projects, saves
//! and restores their state, and reunites restarted processes with the
//! identity they had before a crash.

pub mod bus;
pub mod config;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod project;
pub mod services;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
