use snoozer_core::SnoozerError;
use snoozer_store::StoreError;
use thiserror::Error;

/// Failure reported by a host collaborator (tab host, notifier).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Tab host unavailable: {0}")]
    Unavailable(String),

    #[error("Tab {id} not found")]
    TabNotFound { id: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur within the wakeup scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Validation failure: empty URL or an unusable recurrence rule.
    #[error(transparent)]
    Invalid(#[from] SnoozerError),

    /// A periodic re-snooze was requested for an entry without a period.
    #[error("Entry {url} has no period to re-snooze with")]
    MissingPeriod { url: String },

    #[error("No wakeup time and no period given")]
    MissingWakeTime,

    #[error("No active tab to snooze")]
    NoActiveTab,

    #[error("Tab host error: {0}")]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
