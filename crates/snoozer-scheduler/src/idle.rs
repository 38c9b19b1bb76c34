use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::alarm::Signal;
use crate::engine::WakeupEngine;
use crate::error::Result;

/// System activity as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

/// Pauses the wakeup alarm while the system is idle or asleep.
///
/// Going idle cancels the alarm and keeps it off, so no tab opens while the
/// machine sleeps or in the instant it resumes. Becoming active re-arms it
/// after `resume_delay` rather than at the true next wakeup, giving the
/// network a chance to come back before any tab loads; nothing re-arms it
/// earlier in the meantime.
pub struct IdleMonitor {
    resume_delay: Duration,
    last: Mutex<Option<IdleState>>,
}

impl IdleMonitor {
    pub fn new(resume_delay: Duration) -> Self {
        Self {
            resume_delay,
            last: Mutex::new(None),
        }
    }

    pub async fn on_state_changed(&self, engine: &WakeupEngine, state: IdleState) -> Result<()> {
        {
            let mut last = self.last.lock().expect("idle state poisoned");
            if *last == Some(state) {
                return Ok(());
            }
            *last = Some(state);
        }

        match state {
            IdleState::Active => {
                info!(delay_secs = self.resume_delay.as_secs(), "system active after idle time");
                engine.resume_alarm(self.resume_delay).await
            }
            IdleState::Idle | IdleState::Locked => {
                info!(?state, "system idle, turning off wakeup alarm");
                engine.suspend_alarm().await;
                Ok(())
            }
        }
    }
}

/// Whether the wall clock advanced by more than `gap` beyond the monotonic
/// clock between two observations. The monotonic clock stops during suspend.
pub fn is_suspend_gap(wall_elapsed: chrono::Duration, mono_elapsed: Duration, gap: Duration) -> bool {
    let Ok(wall) = wall_elapsed.to_std() else {
        // wall clock went backwards (NTP step); not a suspend
        return false;
    };
    wall.saturating_sub(mono_elapsed) > gap
}

/// Watches for system suspend and reports it as an idle → active cycle.
///
/// Hosts without a native idle API use this as their [`IdleState`] source.
pub async fn watch_suspend(
    tx: mpsc::Sender<Signal>,
    tick: Duration,
    gap: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    let mut last_wall = Utc::now();
    let mut last_mono = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let (wall, mono) = (Utc::now(), tokio::time::Instant::now());
                if is_suspend_gap(wall - last_wall, mono - last_mono, gap) {
                    warn!(slept_secs = (wall - last_wall).num_seconds(), "system resumed from suspend");
                    for state in [IdleState::Idle, IdleState::Active] {
                        if tx.send(Signal::Idle(state)).await.is_err() {
                            return;
                        }
                    }
                }
                last_wall = wall;
                last_mono = mono;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
