//! On-disk layout of projects: document, notes, client stores.

pub mod dirs;
pub mod document;
pub mod notes;
pub mod store;
