use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snoozer_core::{SnoozeEntry, TabHandle, TabInfo};

use crate::error::HostError;

/// The browser side: creates, finds, and closes tabs.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Open one tab per entry, in order. Only the first may be made active.
    ///
    /// Returns one outcome per entry, in entry order, so a failure part way
    /// through does not hide the tabs that did open.
    async fn create_tabs(
        &self,
        entries: &[SnoozeEntry],
        make_active: bool,
    ) -> Vec<Result<TabHandle, HostError>>;

    async fn close_tab(&self, id: u64) -> Result<(), HostError>;

    async fn query_tabs_by_url(&self, url: &str) -> Result<Vec<TabInfo>, HostError>;

    /// The tab the user is looking at, if the host knows.
    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError>;
}

/// Fire-and-forget "n tabs woke up" display.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_woken(
        &self,
        entries: &[SnoozeEntry],
        first_tab: Option<&TabHandle>,
    ) -> Result<(), HostError>;
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
