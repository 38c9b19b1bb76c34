//! User-facing snooze operations layered on the [`WakeupEngine`].

use chrono::{DateTime, TimeDelta, Utc};
use snoozer_core::config::REPEAT_SNOOZE_WINDOW_SECS;
use snoozer_core::{RecurrenceRule, SnoozeEntry, TabInfo, UndoItem};
use tracing::{debug, info, warn};

use crate::engine::{AlarmMode, WakeupEngine};
use crate::error::{Result, SchedulerError};

/// How a tab should be snoozed.
#[derive(Debug, Clone, Default)]
pub struct SnoozeRequest {
    /// Absolute wake time. Ignored when `period` is set.
    pub wake_at: Option<DateTime<Utc>>,
    pub period: Option<RecurrenceRule>,
    /// Snooze option the user picked, stored as the entry's `type`.
    pub kind: Option<String>,
    /// Close the source tab once the snooze is saved.
    pub close_tab: bool,
}

impl WakeupEngine {
    /// Snooze `tab` and re-arm the alarm.
    ///
    /// Nothing is written when the URL is empty or no wake time can be
    /// derived. The source tab is closed last, and only best-effort.
    pub async fn snooze_tab(&self, tab: &TabInfo, request: SnoozeRequest) -> Result<SnoozeEntry> {
        let now = self.clock.now();
        let when = match &request.period {
            Some(rule) => self.calculator.next_occurrence(rule, now)?,
            None => request.wake_at.ok_or(SchedulerError::MissingWakeTime)?,
        };

        let entry = SnoozeEntry {
            url: tab.url.clone(),
            title: tab.title.clone(),
            favicon: tab.favicon.clone(),
            kind: request.kind,
            sleep_start: now,
            when,
            period: request.period,
        };
        entry.validate()?;

        self.queue.push_pending(entry.clone()).await?;
        info!(url = %entry.url, when = %entry.when, periodic = entry.is_periodic(), "tab snoozed");

        self.schedule_wakeup_alarm(AlarmMode::Auto).await?;

        if request.close_tab {
            if let Err(e) = self.tabs.close_tab(tab.id).await {
                warn!(tab_id = tab.id, "could not close snoozed tab: {e}");
            }
        }
        Ok(entry)
    }

    pub async fn snooze_active_tab(&self, request: SnoozeRequest) -> Result<SnoozeEntry> {
        let tab = self
            .tabs
            .active_tab()
            .await?
            .ok_or(SchedulerError::NoActiveTab)?;
        self.snooze_tab(&tab, request).await
    }

    /// Snooze the active tab the same way as the most recent snooze, if that
    /// snooze happened within the last ten minutes.
    pub async fn repeat_last_snooze(&self) -> Result<Option<SnoozeEntry>> {
        let pending = self.queue.list_pending().await?;
        let Some(last) = pending.into_iter().max_by_key(|e| e.sleep_start) else {
            debug!("no snooze to repeat");
            return Ok(None);
        };
        if self.clock.now() - last.sleep_start > TimeDelta::seconds(REPEAT_SNOOZE_WINDOW_SECS) {
            debug!(url = %last.url, "last snooze too old to repeat");
            return Ok(None);
        }

        let request = SnoozeRequest {
            wake_at: if last.is_periodic() { None } else { Some(last.when) },
            period: last.period,
            kind: last.kind,
            close_tab: true,
        };
        self.snooze_active_tab(request).await.map(Some)
    }

    /// Re-enqueue a periodic entry at its next occurrence.
    pub async fn resnooze_periodic(&self, entry: &SnoozeEntry) -> Result<SnoozeEntry> {
        let renewed = self.calculator.renew(entry, self.clock.now())?;
        self.queue.push_pending(renewed.clone()).await?;
        info!(url = %renewed.url, when = %renewed.when, "re-snoozing periodic tab");
        self.schedule_wakeup_alarm(AlarmMode::Auto).await?;
        Ok(renewed)
    }

    /// Remove entries from the pending set. Returns how many were removed.
    pub async fn delete_entries(&self, targets: &[SnoozeEntry]) -> Result<usize> {
        let removed = self
            .queue
            .update(|entries| {
                let before = entries.len();
                entries.retain(|e| !targets.iter().any(|t| t.is_same_snooze(e)));
                Ok::<_, SchedulerError>(before - entries.len())
            })
            .await?;
        info!(count = removed, "snoozed tabs deleted");
        self.schedule_wakeup_alarm(AlarmMode::Auto).await?;
        Ok(removed)
    }

    /// Recently woken entries, most recent first.
    pub async fn list_undo(&self) -> Result<Vec<UndoItem>> {
        Ok(self.queue.list_undo().await?)
    }

    /// Undo the most recent wakeup: put the entry back into pending and close
    /// its tab if it is still open. Returns `None` when there is nothing to undo.
    pub async fn undo(&self) -> Result<Option<SnoozeEntry>> {
        let Some(item) = self.queue.pop_undo().await? else {
            info!("no items in undo stack");
            return Ok(None);
        };
        let awoken_at = item.awoken_at;
        let entry = item.into_entry();
        info!(url = %entry.url, title = %entry.display_title(), "undoing wake-up");

        if let Err(e) = self.queue.push_pending(entry.clone()).await {
            // Put the item back so the undo can be retried.
            if let Err(restore) = self.queue.push_undo(entry.clone(), awoken_at).await {
                warn!(url = %entry.url, "could not restore undo item: {restore}");
            }
            return Err(e.into());
        }

        self.schedule_wakeup_alarm(AlarmMode::Auto).await?;

        // The entry is safely pending again; closing the tab is a courtesy.
        match self.tabs.query_tabs_by_url(&entry.url).await {
            Ok(tabs) => {
                if let Some(tab) = tabs.first() {
                    match self.tabs.close_tab(tab.id).await {
                        Ok(()) => debug!(tab_id = tab.id, "closed awakened tab"),
                        Err(e) => warn!(tab_id = tab.id, "could not close awakened tab: {e}"),
                    }
                }
            }
            Err(e) => warn!(url = %entry.url, "could not look up awakened tab: {e}"),
        }

        Ok(Some(entry))
    }
}
