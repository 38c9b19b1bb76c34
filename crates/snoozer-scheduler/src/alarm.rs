use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::idle::IdleState;

/// Asynchronous inputs to the wakeup engine's run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The wakeup alarm went off. Says nothing about which entry is due.
    Alarm,
    /// The system changed between active and idle/locked.
    Idle(IdleState),
    /// Re-arm the alarm from storage (another process may have written).
    Resync,
}

/// A single named, coalescing timer.
///
/// Scheduling replaces any pending fire; there is never more than one armed.
/// Fires may arrive late (system suspend, process stalls), so receivers must
/// derive what is due from absolute time rather than from the fire itself.
#[async_trait]
pub trait AlarmDriver: Send + Sync {
    /// Arm (or re-arm) the alarm for `at`. A time in the past fires promptly.
    async fn schedule(&self, at: DateTime<Utc>);

    /// Disarm. No-op when nothing is armed.
    async fn cancel(&self);

    /// The currently armed time, if any.
    fn armed_at(&self) -> Option<DateTime<Utc>>;
}

struct Armed {
    at: DateTime<Utc>,
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    armed: Option<Armed>,
    generation: u64,
}

/// [`AlarmDriver`] backed by a Tokio sleep task that sends [`Signal::Alarm`]
/// into the engine's signal channel.
pub struct TokioAlarm {
    name: String,
    tx: mpsc::Sender<Signal>,
    slot: Arc<Mutex<Slot>>,
}

impl TokioAlarm {
    pub fn new(name: &str, tx: mpsc::Sender<Signal>) -> Self {
        Self {
            name: name.to_string(),
            tx,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }
}

#[async_trait]
impl AlarmDriver for TokioAlarm {
    async fn schedule(&self, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let mut slot = self.slot.lock().expect("alarm slot poisoned");
        if let Some(prev) = slot.armed.take() {
            prev.task.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;

        let tx = self.tx.clone();
        let shared = Arc::clone(&self.slot);
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock().expect("alarm slot poisoned");
                // Only clear our own arming; a newer one may have replaced us.
                if slot.armed.as_ref().is_some_and(|a| a.generation == generation) {
                    slot.armed = None;
                }
            }
            debug!(alarm = %name, "alarm fired");
            if tx.send(Signal::Alarm).await.is_err() {
                warn!(alarm = %name, "signal channel closed, alarm dropped");
            }
        });

        debug!(alarm = %self.name, at = %at, "alarm armed");
        slot.armed = Some(Armed {
            at,
            generation,
            task,
        });
    }

    async fn cancel(&self) {
        let mut slot = self.slot.lock().expect("alarm slot poisoned");
        if let Some(prev) = slot.armed.take() {
            prev.task.abort();
            debug!(alarm = %self.name, "alarm cancelled");
        }
    }

    fn armed_at(&self) -> Option<DateTime<Utc>> {
        let slot = self.slot.lock().expect("alarm slot poisoned");
        slot.armed.as_ref().map(|a| a.at)
    }
}

impl Drop for TokioAlarm {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(prev) = slot.armed.take() {
                prev.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn past_time_fires_promptly() {
        let (tx, mut rx) = mpsc::channel(4);
        let alarm = TokioAlarm::new("test", tx);
        alarm.schedule(Utc::now() - Duration::minutes(5)).await;

        let sig = timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(sig, Some(Signal::Alarm));
        assert_eq!(alarm.armed_at(), None);
    }

    #[tokio::test]
    async fn rescheduling_replaces_pending_fire() {
        let (tx, mut rx) = mpsc::channel(4);
        let alarm = TokioAlarm::new("test", tx);
        alarm.schedule(Utc::now() + Duration::milliseconds(50)).await;
        let later = Utc::now() + Duration::hours(1);
        alarm.schedule(later).await;

        assert_eq!(alarm.armed_at(), Some(later));
        assert!(timeout(StdDuration::from_millis(200), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn cancel_disarms() {
        let (tx, mut rx) = mpsc::channel(4);
        let alarm = TokioAlarm::new("test", tx);
        alarm.cancel().await; // nothing armed, no-op
        alarm.schedule(Utc::now() + Duration::milliseconds(50)).await;
        alarm.cancel().await;

        assert_eq!(alarm.armed_at(), None);
        assert!(timeout(StdDuration::from_millis(200), rx.recv()).await.is_err());
    }
}
