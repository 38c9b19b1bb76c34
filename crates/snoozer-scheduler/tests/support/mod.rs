// Recording fakes for the engine's collaborators.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use snoozer_core::{SnoozeEntry, TabHandle, TabInfo};
use snoozer_scheduler::{
    AlarmDriver, Clock, HostError, Notifier, PeriodCalculator, TabHost, WakeupEngine,
};
use snoozer_store::{MemoryStore, PersistentQueue};
use tokio::sync::mpsc;

/// 2026-10-19 09:00:00 UTC, a Monday.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
}

pub fn entry(url: &str, when: DateTime<Utc>) -> SnoozeEntry {
    SnoozeEntry {
        url: url.to_string(),
        title: Some(format!("Page {url}")),
        favicon: None,
        kind: Some("custom".to_string()),
        sleep_start: when - TimeDelta::days(1),
        when,
        period: None,
    }
}

pub fn tab(id: u64, url: &str) -> TabInfo {
    TabInfo {
        id,
        url: url.to_string(),
        title: Some(format!("Page {url}")),
        favicon: None,
    }
}

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap() = at;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingAlarm {
    armed: Mutex<Option<DateTime<Utc>>>,
    pub cancels: AtomicU64,
    pub schedules: AtomicU64,
}

#[async_trait]
impl AlarmDriver for RecordingAlarm {
    async fn schedule(&self, at: DateTime<Utc>) {
        *self.armed.lock().unwrap() = Some(at);
        self.schedules.fetch_add(1, Ordering::SeqCst);
    }

    async fn cancel(&self) {
        *self.armed.lock().unwrap() = None;
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn armed_at(&self) -> Option<DateTime<Utc>> {
        *self.armed.lock().unwrap()
    }
}

#[derive(Default)]
pub struct FakeTabs {
    /// Entries actually opened, per `create_tabs` call.
    pub created: Mutex<Vec<(Vec<SnoozeEntry>, bool)>>,
    pub open: Mutex<Vec<TabInfo>>,
    pub closed: Mutex<Vec<u64>>,
    pub active: Mutex<Option<TabInfo>>,
    pub fail_create: AtomicBool,
    /// Refuse to open this URL; the others still open.
    pub fail_url: Mutex<Option<String>>,
    pub fail_query: AtomicBool,
    next_id: AtomicU64,
}

impl FakeTabs {
    /// Every entry opened by `create_tabs`, across calls.
    pub fn created_entries(&self) -> Vec<SnoozeEntry> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(entries, _)| entries.clone())
            .collect()
    }

    pub fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl TabHost for FakeTabs {
    async fn create_tabs(
        &self,
        entries: &[SnoozeEntry],
        make_active: bool,
    ) -> Vec<Result<TabHandle, HostError>> {
        let fail_url = self.fail_url.lock().unwrap().clone();
        let mut opened = Vec::new();
        let mut outcomes = Vec::new();
        for e in entries {
            if self.fail_create.load(Ordering::SeqCst) || fail_url.as_deref() == Some(e.url.as_str()) {
                outcomes.push(Err(HostError::Unavailable("browser gone".to_string())));
                continue;
            }
            let id = 100 + self.next_id.fetch_add(1, Ordering::SeqCst);
            self.open.lock().unwrap().push(TabInfo {
                id,
                url: e.url.clone(),
                title: e.title.clone(),
                favicon: e.favicon.clone(),
            });
            outcomes.push(Ok(TabHandle {
                id,
                url: e.url.clone(),
                active: make_active && opened.is_empty(),
            }));
            opened.push(e.clone());
        }
        self.created.lock().unwrap().push((opened, make_active));
        outcomes
    }

    async fn close_tab(&self, id: u64) -> Result<(), HostError> {
        let mut open = self.open.lock().unwrap();
        let before = open.len();
        open.retain(|t| t.id != id);
        self.closed.lock().unwrap().push(id);
        if open.len() == before {
            return Err(HostError::TabNotFound { id });
        }
        Ok(())
    }

    async fn query_tabs_by_url(&self, url: &str) -> Result<Vec<TabInfo>, HostError> {
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("query failed".to_string()));
        }
        Ok(self
            .open
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.url == url)
            .cloned()
            .collect())
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError> {
        Ok(self.active.lock().unwrap().clone())
    }
}

/// Reports the number of woken entries per notification.
pub struct ChannelNotifier(pub mpsc::UnboundedSender<usize>);

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify_woken(
        &self,
        entries: &[SnoozeEntry],
        _first_tab: Option<&TabHandle>,
    ) -> Result<(), HostError> {
        let _ = self.0.send(entries.len());
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<WakeupEngine>,
    pub clock: Arc<ManualClock>,
    pub alarm: Arc<RecordingAlarm>,
    pub tabs: Arc<FakeTabs>,
    pub durable: Arc<MemoryStore>,
    pub session: Arc<MemoryStore>,
    pub notes: mpsc::UnboundedReceiver<usize>,
}

impl Harness {
    pub fn queue(&self) -> &PersistentQueue {
        self.engine.queue()
    }

    pub async fn seed(&self, entries: &[SnoozeEntry]) {
        self.queue().save_all(entries).await.unwrap();
    }

    pub async fn pending(&self) -> Vec<SnoozeEntry> {
        self.queue().list_pending().await.unwrap()
    }
}

pub fn harness() -> Harness {
    let durable = Arc::new(MemoryStore::new("durable"));
    let session = Arc::new(MemoryStore::new("session"));
    let clock = Arc::new(ManualClock(Mutex::new(t0())));
    let alarm = Arc::new(RecordingAlarm::default());
    let tabs = Arc::new(FakeTabs::default());
    let (tx, notes) = mpsc::unbounded_channel();

    let queue = Arc::new(PersistentQueue::new(durable.clone(), session.clone()));
    let engine = WakeupEngine::new(
        queue,
        session.clone(),
        alarm.clone(),
        tabs.clone(),
        Arc::new(ChannelNotifier(tx)),
    )
    .with_clock(clock.clone())
    .with_calculator(PeriodCalculator::utc())
    .with_debounce(Duration::from_millis(200));

    Harness {
        engine: Arc::new(engine),
        clock,
        alarm,
        tabs,
        durable,
        session,
        notes,
    }
}
