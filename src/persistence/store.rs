//! Per-client key/value store backed by a JSON file.
//!
//! Data-set clients hand their configuration to the daemon instead of
//! writing files themselves. The store keeps those entries in
//! `<config dir>/store.json`. Open and close must be paired: moving a
//! project closes every store, renames the directory and reopens them at
//! the new location.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::{AppError, Result};

/// File name of the persisted entries inside the store directory.
pub const STORE_FILE: &str = "store.json";

/// Key/value configuration of one client.
#[derive(Debug, Default)]
pub struct Store {
    dir: PathBuf,
    entries: BTreeMap<String, Value>,
    open: bool,
    dirty: bool,
}

impl Store {
    /// Open a store rooted at `dir`, reading existing entries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the file exists but cannot be parsed.
    pub fn open_at(dir: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self::default();
        store.open(dir)?;
        Ok(store)
    }

    /// Open the store at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the store is already open or the file
    /// cannot be read or parsed.
    pub fn open(&mut self, dir: impl Into<PathBuf>) -> Result<()> {
        if self.open {
            return Err(AppError::Store(format!(
                "store at {} is already open",
                self.dir.display()
            )));
        }

        let dir = dir.into();
        let path = dir.join(STORE_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                AppError::Store(format!("corrupt store {}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(AppError::Store(format!(
                    "failed to read store {}: {err}",
                    path.display()
                )))
            }
        };

        debug!(dir = %dir.display(), keys = entries.len(), "store opened");
        self.dir = dir;
        self.entries = entries;
        self.open = true;
        self.dirty = false;
        Ok(())
    }

    /// Write unsaved entries and mark the store closed.
    ///
    /// Closing an already closed store is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if unsaved entries cannot be written; the
    /// store is closed regardless.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        let result = if self.dirty { self.write() } else { Ok(()) };
        self.open = false;
        self.entries.clear();
        self.dirty = false;
        result
    }

    /// Persist the entries. An empty store removes its file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the store is closed or the file cannot
    /// be written.
    pub fn write(&mut self) -> Result<()> {
        if !self.open {
            return Err(AppError::Store("cannot write a closed store".into()));
        }

        let path = self.dir.join(STORE_FILE);
        if self.entries.is_empty() {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(AppError::Store(format!(
                        "failed to remove {}: {err}",
                        path.display()
                    )))
                }
            }
            self.dirty = false;
            return Ok(());
        }

        fs::create_dir_all(&self.dir).map_err(|err| {
            AppError::Store(format!("failed to create {}: {err}", self.dir.display()))
        })?;
        let body = serde_json::to_vec_pretty(&self.entries)
            .map_err(|err| AppError::Store(format!("failed to encode store: {err}")))?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|err| AppError::Store(format!("failed to stage store: {err}")))?;
        file.write_all(&body)
            .map_err(|err| AppError::Store(format!("failed to stage store: {err}")))?;
        file.persist(&path)
            .map_err(|err| AppError::Store(format!("failed to write {}: {err}", path.display())))?;

        self.dirty = false;
        Ok(())
    }

    /// Whether the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Directory the store was last opened at.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stored keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Whether no entries are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries.
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Store `value` under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
        self.dirty = true;
    }

    /// Replace every entry with `entries`.
    pub fn replace(&mut self, entries: BTreeMap<String, Value>) {
        self.entries = entries;
        self.dirty = true;
    }
}
