//! modalstack: a modal dialog lifecycle engine
//!
//! Dialogs are opened from inline or fetched templates, may declare panes to
//! swap in place, get a controller instantiated with injected dependencies and
//! are torn down in two phases gated by a teardown-finished signal.

pub mod config;
pub mod dialog;
pub mod version;

pub use config::DialogDefaults;
pub use dialog::{DialogError, DialogHandle, DialogManager, DialogOptions, DialogResult};
