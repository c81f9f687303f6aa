//! Local IPC layer.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that accepts JSON-line commands from clients, observers and
//! `ensemble-ctl`.

pub mod server;
