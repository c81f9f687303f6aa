//! Free-form project notes stored next to the project document.

use std::fs;
use std::path::Path;

use crate::{AppError, Result};

/// File name of the notes inside the project directory.
pub const NOTES_FILE: &str = "notes.txt";

/// Read the notes of the project in `project_dir`.
///
/// # Errors
///
/// Returns `AppError::Io` if the file is missing or unreadable.
pub fn read_notes(project_dir: &Path) -> Result<String> {
    let path = project_dir.join(NOTES_FILE);
    fs::read_to_string(&path)
        .map_err(|err| AppError::Io(format!("failed to read notes {}: {err}", path.display())))
}

/// Write `notes` for the project in `project_dir`.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be written.
pub fn write_notes(project_dir: &Path, notes: &str) -> Result<()> {
    let path = project_dir.join(NOTES_FILE);
    fs::write(&path, notes)
        .map_err(|err| AppError::Io(format!("failed to write notes {}: {err}", path.display())))
}
