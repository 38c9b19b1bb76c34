use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{json, Value};
use snoozer_core::config::{DEFAULT_DEBOUNCE_MS, KEY_WAKEUP_THRESHOLD, WAKEUP_WINDOW_SECS};
use snoozer_core::{SnoozeEntry, TabHandle};
use snoozer_store::{KeyValueStore, PersistentQueue};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    alarm::{AlarmDriver, Signal},
    debounce::Debouncer,
    error::{HostError, Result, SchedulerError},
    host::{Clock, Notifier, SystemClock, TabHost},
    idle::IdleMonitor,
    schedule::PeriodCalculator,
};

/// Name of the single wakeup alarm.
pub const WAKEUP_ALARM_NAME: &str = "WAKEUP_TABS_ALARM";

/// Where to arm the wakeup alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmMode {
    /// At the earliest pending wake time.
    Auto,
    /// A fixed delay from now (used after the system resumes).
    After(Duration),
}

/// What one wakeup pass did.
#[derive(Debug, Default, Clone)]
pub struct WakeReport {
    /// Entries removed from pending and opened as tabs. Entries whose tab
    /// could not be opened are back in pending and not listed here.
    pub woken: Vec<SnoozeEntry>,
    /// Periodic entries re-enqueued at their next occurrence.
    pub renewed: Vec<SnoozeEntry>,
    /// Handles of the opened tabs, one per `woken` entry and in the same order.
    pub tabs: Vec<TabHandle>,
    /// Due entries that failed validation; they stay pending untouched.
    pub rejected: Vec<SnoozeEntry>,
}

#[derive(Debug)]
pub enum WakeupOutcome {
    /// A recent pass already owns the window up to `until`.
    AlreadyClaimed { until: DateTime<Utc> },
    Woke(WakeReport),
}

/// Restriction on arming the alarm, driven by idle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlarmHold {
    Released,
    /// Idle or locked: the alarm stays off.
    Idle,
    /// Resumed: nothing is armed before this instant.
    Until(DateTime<Utc>),
}

enum Claim {
    Claimed(DateTime<Utc>),
    Held(DateTime<Utc>),
}

enum Selection {
    DueBy(DateTime<Utc>),
    Exact(Vec<SnoozeEntry>),
}

impl Selection {
    fn includes(&self, entry: &SnoozeEntry) -> bool {
        match self {
            Selection::DueBy(threshold) => entry.when <= *threshold,
            Selection::Exact(wanted) => wanted.iter().any(|w| w.is_same_snooze(entry)),
        }
    }
}

/// Wakes due snoozes and keeps the alarm armed for the next one.
///
/// Every alarm fire is treated as "something may be due": the engine re-reads
/// the pending set and compares absolute wake times against a threshold
/// claimed in the session store, so late, duplicate, or coalesced fires never
/// wake an entry twice.
pub struct WakeupEngine {
    pub(crate) queue: Arc<PersistentQueue>,
    session: Arc<dyn KeyValueStore>,
    alarm: Arc<dyn AlarmDriver>,
    pub(crate) tabs: Arc<dyn TabHost>,
    notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) calculator: PeriodCalculator,
    debouncer: Debouncer,
    notifications: bool,
    hold: Mutex<AlarmHold>,
}

impl WakeupEngine {
    pub fn new(
        queue: Arc<PersistentQueue>,
        session: Arc<dyn KeyValueStore>,
        alarm: Arc<dyn AlarmDriver>,
        tabs: Arc<dyn TabHost>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            queue,
            session,
            alarm,
            tabs,
            notifier,
            clock: Arc::new(SystemClock),
            calculator: PeriodCalculator::default(),
            debouncer: Debouncer::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS)),
            notifications: true,
            hold: Mutex::new(AlarmHold::Released),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_calculator(mut self, calculator: PeriodCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn with_debounce(mut self, cooldown: Duration) -> Self {
        self.debouncer = Debouncer::new(cooldown);
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications = enabled;
        self
    }

    pub fn queue(&self) -> &PersistentQueue {
        &self.queue
    }

    /// Upper bound of wake times already handled; the epoch when unset.
    pub async fn wakeup_threshold(&self) -> Result<DateTime<Utc>> {
        let raw = self.session.get(KEY_WAKEUP_THRESHOLD).await?;
        Ok(threshold_from(raw))
    }

    /// Compare and advance the threshold in one store operation, so two
    /// processes sharing the session store cannot both claim a window.
    async fn claim_window(&self, now: DateTime<Utc>) -> Result<Claim> {
        let mut claim = None;
        self.session
            .modify(
                KEY_WAKEUP_THRESHOLD,
                Box::new(|raw| {
                    let current = threshold_from(raw);
                    if now <= current {
                        claim = Some(Claim::Held(current));
                        return Ok(None);
                    }
                    // A minute ahead, so entries due in the next minute go out together.
                    let next = now + TimeDelta::seconds(WAKEUP_WINDOW_SECS);
                    claim = Some(Claim::Claimed(next));
                    Ok(Some(json!(next.timestamp_millis())))
                }),
            )
            .await?;
        Ok(claim.unwrap_or(Claim::Held(now)))
    }

    /// One wakeup pass: claim the window, wake everything due within it.
    ///
    /// Due entries failing validation are left pending and reported as an
    /// error after the valid ones have been woken.
    #[instrument(skip(self))]
    pub async fn handle_scheduled_wakeup(&self) -> Result<WakeupOutcome> {
        let now = self.clock.now();
        let threshold = match self.claim_window(now).await? {
            Claim::Held(until) => {
                debug!(%until, "tabs for this window already handled by another alarm");
                return Ok(WakeupOutcome::AlreadyClaimed { until });
            }
            Claim::Claimed(threshold) => threshold,
        };

        let (report, host_error) = self.wake(Selection::DueBy(threshold), false).await?;
        if !report.woken.is_empty() {
            self.notify(&report);
        }
        if let Some(e) = host_error {
            return Err(e.into());
        }
        if let Some(bad) = report.rejected.first() {
            bad.validate()?;
        }
        Ok(WakeupOutcome::Woke(report))
    }

    /// Wake specific entries now (e.g. "open now" from a snooze list).
    ///
    /// Every entry is validated before anything is touched. Entries that are
    /// no longer pending are skipped.
    pub async fn wakeup_tabs(
        &self,
        entries: &[SnoozeEntry],
        make_active: bool,
    ) -> Result<Vec<TabHandle>> {
        for entry in entries {
            entry.validate()?;
        }
        let (report, host_error) = self
            .wake(Selection::Exact(entries.to_vec()), make_active)
            .await?;
        match host_error {
            Some(e) => Err(e.into()),
            None => Ok(report.tabs),
        }
    }

    /// Returns the first tab host error alongside the report; entries that
    /// did open stay woken either way.
    async fn wake(
        &self,
        selection: Selection,
        make_active: bool,
    ) -> Result<(WakeReport, Option<HostError>)> {
        let now = self.clock.now();
        let calculator = self.calculator;

        // Read, partition, and write back in one store operation so a snooze
        // landing mid-pass is neither lost nor woken twice.
        let (woken, renewals, rejected) = self
            .queue
            .update(|entries| {
                let (due, mut keep): (Vec<_>, Vec<_>) =
                    std::mem::take(entries).into_iter().partition(|e| selection.includes(e));
                let (valid, rejected): (Vec<_>, Vec<_>) =
                    due.into_iter().partition(|e| e.validate().is_ok());

                // Each renewal remembers which woken entry it came from.
                let renewals = valid
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.is_periodic())
                    .map(|(i, e)| calculator.renew(e, now).map(|next| (i, next)))
                    .collect::<Result<Vec<_>>>()?;

                keep.extend(rejected.iter().cloned());
                keep.extend(renewals.iter().map(|(_, next)| next.clone()));
                *entries = keep;
                Ok::<_, SchedulerError>((valid, renewals, rejected))
            })
            .await?;

        for entry in &rejected {
            error!(url = %entry.url, title = %entry.display_title(), "cannot wake invalid entry; left pending");
        }

        if woken.is_empty() {
            let report = WakeReport {
                rejected,
                ..WakeReport::default()
            };
            return Ok((report, None));
        }

        info!(count = woken.len(), "waking up tabs");
        let mut outcomes = self.tabs.create_tabs(&woken, make_active).await.into_iter();
        let mut opened = vec![false; woken.len()];
        let mut tabs = Vec::with_capacity(woken.len());
        let mut host_error = None;
        for (i, entry) in woken.iter().enumerate() {
            let outcome = outcomes.next().unwrap_or_else(|| {
                Err(HostError::Unavailable("no result for tab".to_string()))
            });
            match outcome {
                Ok(tab) => {
                    opened[i] = true;
                    tabs.push(tab);
                }
                Err(e) => {
                    warn!(url = %entry.url, "could not open tab: {e}");
                    if host_error.is_none() {
                        host_error = Some(e);
                    }
                }
            }
        }

        let (kept, dropped): (Vec<_>, Vec<_>) =
            renewals.into_iter().partition(|(i, _)| opened[*i]);
        let renewed: Vec<_> = kept.into_iter().map(|(_, next)| next).collect();
        let (woken, failed): (Vec<_>, Vec<_>) = woken
            .into_iter()
            .zip(&opened)
            .partition(|(_, ok)| **ok);
        let woken: Vec<_> = woken.into_iter().map(|(e, _)| e).collect();
        let failed: Vec<_> = failed.into_iter().map(|(e, _)| e).collect();

        if let Some(host_err) = &host_error {
            error!(
                failed = failed.len(),
                opened = woken.len(),
                "tab creation failed, restoring unopened entries: {host_err}"
            );
            let dropped: Vec<_> = dropped.into_iter().map(|(_, next)| next).collect();
            if let Err(e) = self.restore(&failed, &dropped).await {
                error!(
                    lost = failed.len(),
                    "could not restore unopened entries after '{host_err}': {e}"
                );
                return Err(e);
            }
        }

        for entry in &renewed {
            info!(url = %entry.url, when = %entry.when, "re-snoozed periodic tab");
        }

        // Periodic entries re-snooze themselves; only one-shots are undoable.
        for entry in woken.iter().filter(|e| !e.is_periodic()) {
            if let Err(e) = self.queue.push_undo(entry.clone(), now).await {
                warn!(url = %entry.url, "could not record undo item: {e}");
            }
        }

        self.schedule_wakeup_alarm(AlarmMode::Auto).await?;

        let report = WakeReport {
            woken,
            renewed,
            tabs,
            rejected,
        };
        Ok((report, host_error))
    }

    /// Put unopened entries back and drop their renewals after a failed wake.
    async fn restore(&self, failed: &[SnoozeEntry], renewed: &[SnoozeEntry]) -> Result<()> {
        self.queue
            .update(|entries| {
                entries.retain(|e| !renewed.iter().any(|r| r.is_same_snooze(e)));
                entries.extend(failed.iter().cloned());
                Ok::<_, SchedulerError>(())
            })
            .await
    }

    fn notify(&self, report: &WakeReport) {
        if !self.notifications {
            return;
        }
        let notifier = Arc::clone(&self.notifier);
        let entries = report.woken.clone();
        let first = report.tabs.first().cloned();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_woken(&entries, first.as_ref()).await {
                warn!("wakeup notification failed: {e}");
            }
        });
    }

    /// Re-arm the alarm from the current pending set, or cancel it when
    /// nothing is pending.
    pub async fn schedule_wakeup_alarm(&self, mode: AlarmMode) -> Result<()> {
        let pending = self.queue.list_pending().await?;
        let earliest = pending
            .iter()
            .filter(|e| e.validate().is_ok())
            .map(|e| e.when)
            .min();
        let Some(earliest) = earliest else {
            self.alarm.cancel().await;
            debug!("nothing pending, wakeup alarm off");
            return Ok(());
        };

        let now = self.clock.now();
        let at = match mode {
            AlarmMode::Auto => {
                let hold = self.current_hold(now);
                if hold == AlarmHold::Idle {
                    debug!("system idle, wakeup alarm stays off");
                    return Ok(());
                }
                // Inside a claimed window a fire would only hit the threshold
                // guard; wait for the window to close instead.
                let threshold = self.wakeup_threshold().await?;
                let at = if threshold > now && earliest <= threshold {
                    threshold + TimeDelta::milliseconds(1)
                } else {
                    earliest
                };
                match hold {
                    AlarmHold::Until(until) => at.max(until),
                    _ => at,
                }
            }
            AlarmMode::After(delay) => now + delay_delta(delay),
        };

        self.alarm.schedule(at).await;
        debug!(%at, ?mode, "wakeup alarm scheduled");
        Ok(())
    }

    pub async fn cancel_alarm(&self) {
        self.alarm.cancel().await;
    }

    /// Turn the alarm off until [`resume_alarm`](Self::resume_alarm).
    /// Resyncs and wakeup passes in between leave it off.
    pub async fn suspend_alarm(&self) {
        *self.hold.lock().expect("alarm hold poisoned") = AlarmHold::Idle;
        self.alarm.cancel().await;
    }

    /// Arm the alarm `delay` from now. Until that instant has passed, Auto
    /// rescheduling never arms anything earlier.
    pub async fn resume_alarm(&self, delay: Duration) -> Result<()> {
        let until = self.clock.now() + delay_delta(delay);
        *self.hold.lock().expect("alarm hold poisoned") = AlarmHold::Until(until);
        self.schedule_wakeup_alarm(AlarmMode::After(delay)).await
    }

    /// Current hold; a resume hold whose instant has passed is released.
    fn current_hold(&self, now: DateTime<Utc>) -> AlarmHold {
        let mut hold = self.hold.lock().expect("alarm hold poisoned");
        if let AlarmHold::Until(until) = *hold {
            if now >= until {
                *hold = AlarmHold::Released;
            }
        }
        *hold
    }

    /// Debounced alarm entry point. Returns false when the call was dropped.
    pub async fn on_alarm(&self) -> bool {
        if self.current_hold(self.clock.now()) == AlarmHold::Idle {
            debug!("system idle, alarm fire ignored");
            return false;
        }
        self.debouncer
            .run(|| async {
                info!("alarm fired - waking up ready tabs");
                match self.handle_scheduled_wakeup().await {
                    Ok(WakeupOutcome::Woke(report)) if !report.woken.is_empty() => {
                        info!(woken = report.woken.len(), renewed = report.renewed.len(), "wakeup pass complete");
                    }
                    Ok(_) => {}
                    Err(e) => error!("wakeup pass failed: {e}"),
                }
                if let Err(e) = self.schedule_wakeup_alarm(AlarmMode::Auto).await {
                    error!("could not reschedule wakeup alarm: {e}");
                }
            })
            .await
            .is_some()
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true` or the
    /// signal channel closes.
    pub async fn run(
        self: Arc<Self>,
        mut signals: mpsc::Receiver<Signal>,
        idle: IdleMonitor,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("wakeup engine started");
        // Anything that fell due while we were down fires right away.
        if let Err(e) = self.schedule_wakeup_alarm(AlarmMode::Auto).await {
            error!("initial alarm scheduling failed: {e}");
        }

        loop {
            tokio::select! {
                Some(signal) = signals.recv() => match signal {
                    Signal::Alarm => {
                        // The debouncer and threshold stop overlapping passes
                        // from waking anything twice.
                        let engine = Arc::clone(&self);
                        tokio::spawn(async move {
                            engine.on_alarm().await;
                        });
                    }
                    Signal::Idle(state) => {
                        if let Err(e) = idle.on_state_changed(&self, state).await {
                            error!(?state, "idle transition handling failed: {e}");
                        }
                    }
                    Signal::Resync => {
                        if let Err(e) = self.schedule_wakeup_alarm(AlarmMode::Auto).await {
                            error!("alarm resync failed: {e}");
                        }
                    }
                },
                changed = shutdown.changed() => {
                    // a dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        info!("wakeup engine shutting down");
                        break;
                    }
                }
                else => break,
            }
        }
    }
}

fn threshold_from(raw: Option<Value>) -> DateTime<Utc> {
    raw.and_then(|v| v.as_i64())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn delay_delta(delay: Duration) -> TimeDelta {
    TimeDelta::from_std(delay).unwrap_or(TimeDelta::seconds(WAKEUP_WINDOW_SECS))
}
