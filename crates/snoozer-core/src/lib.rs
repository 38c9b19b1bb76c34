//! `snoozer-core`: data model, configuration and shared errors for the tab
//! snooze scheduler.

pub mod config;
pub mod error;
pub mod types;

pub use config::SnoozerConfig;
pub use error::{Result, SnoozerError};
pub use types::{RecurrenceRule, SnoozeEntry, TabHandle, TabInfo, UndoItem};
