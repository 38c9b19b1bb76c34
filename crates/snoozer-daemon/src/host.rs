//! Desktop host: opens woken tabs through an external browser command.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snoozer_core::config::BrowserConfig;
use snoozer_core::{SnoozeEntry, TabHandle, TabInfo};
use snoozer_scheduler::{AlarmDriver, HostError, Notifier, TabHost};
use tracing::{debug, info, warn};

/// [`TabHost`] that launches `browser.command [args..] <url>` once per tab.
///
/// The browser owns the tabs once launched, so this host only remembers what
/// it opened during this process's lifetime and cannot close anything.
pub struct CommandTabHost {
    command: String,
    args: Vec<String>,
    next_id: AtomicU64,
    opened: Mutex<Vec<TabInfo>>,
}

impl CommandTabHost {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            next_id: AtomicU64::new(1),
            opened: Mutex::new(Vec::new()),
        }
    }

    async fn launch(&self, url: &str) -> Result<(), HostError> {
        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        // Reap in the background; openers like xdg-open exit right away,
        // a browser binary may keep running.
        let command = self.command.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    warn!(command = %command, %status, "browser command exited with failure")
                }
                Ok(_) => {}
                Err(e) => warn!(command = %command, "failed to wait for browser command: {e}"),
            }
        });
        Ok(())
    }
}

#[async_trait]
impl TabHost for CommandTabHost {
    async fn create_tabs(
        &self,
        entries: &[SnoozeEntry],
        make_active: bool,
    ) -> Vec<Result<TabHandle, HostError>> {
        let mut outcomes = Vec::with_capacity(entries.len());
        let mut first = true;
        for entry in entries {
            if let Err(e) = self.launch(&entry.url).await {
                warn!(url = %entry.url, command = %self.command, "could not launch browser: {e}");
                outcomes.push(Err(e));
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            debug!(id, url = %entry.url, "tab opened");
            self.opened.lock().unwrap().push(TabInfo {
                id,
                url: entry.url.clone(),
                title: entry.title.clone(),
                favicon: entry.favicon.clone(),
            });
            outcomes.push(Ok(TabHandle {
                id,
                url: entry.url.clone(),
                active: make_active && first,
            }));
            first = false;
        }
        outcomes
    }

    async fn close_tab(&self, id: u64) -> Result<(), HostError> {
        let mut opened = self.opened.lock().unwrap();
        let before = opened.len();
        opened.retain(|t| t.id != id);
        if opened.len() == before {
            return Err(HostError::TabNotFound { id });
        }
        Err(HostError::Unavailable(format!(
            "'{}' cannot close browser tabs",
            self.command
        )))
    }

    async fn query_tabs_by_url(&self, url: &str) -> Result<Vec<TabInfo>, HostError> {
        Ok(self
            .opened
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.url == url)
            .cloned()
            .collect())
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError> {
        Ok(None)
    }
}

/// Writes wakeup notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_woken(
        &self,
        entries: &[SnoozeEntry],
        first_tab: Option<&TabHandle>,
    ) -> Result<(), HostError> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        if entries.len() == 1 {
            info!(url = %first.url, tab = ?first_tab.map(|t| t.id), "{} woke up", first.display_title());
        } else {
            info!(count = entries.len(), first = %first.display_title(), "{} tabs woke up", entries.len());
        }
        Ok(())
    }
}

/// Alarm for one-shot CLI commands. The running daemon owns the real timer
/// and re-arms it from storage on its next resync.
#[derive(Default)]
pub struct DetachedAlarm {
    armed: Mutex<Option<DateTime<Utc>>>,
}

#[async_trait]
impl AlarmDriver for DetachedAlarm {
    async fn schedule(&self, at: DateTime<Utc>) {
        debug!(%at, "next wakeup left to the daemon");
        *self.armed.lock().unwrap() = Some(at);
    }

    async fn cancel(&self) {
        *self.armed.lock().unwrap() = None;
    }

    fn armed_at(&self) -> Option<DateTime<Utc>> {
        *self.armed.lock().unwrap()
    }
}
