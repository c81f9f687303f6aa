//! Error types shared across the daemon.

use std::fmt::{Display, Formatter};

/// Shared daemon result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Daemon error enumeration covering all domain failure modes.
///
/// None of these terminate the daemon; the dispatch loop reports them to
/// the caller and keeps serving other projects and clients.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Operation refused because a precondition is unmet (task running,
    /// name taken, destination exists). No state was changed.
    Rejected(String),
    /// Requested project or client does not exist.
    NotFound(String),
    /// Project document could not be parsed or serialized.
    Document(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Client key/value store misuse or I/O failure.
    Store(String),
    /// Client process could not be launched.
    Launch(String),
    /// The bus could not deliver a request to a client.
    Delivery(String),
    /// IPC communication failure.
    Ipc(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Rejected(msg) => write!(f, "rejected: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Document(msg) => write!(f, "document: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Delivery(msg) => write!(f, "delivery: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
