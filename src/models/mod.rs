//! Domain model module declarations.

pub mod client;
pub mod dependency;
pub mod patch;
pub mod view;
