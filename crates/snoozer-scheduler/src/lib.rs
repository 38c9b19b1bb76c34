//! `snoozer-scheduler`: wakes snoozed tabs on time, exactly once.
//!
//! # Overview
//!
//! Pending snoozes live in a [`snoozer_store::PersistentQueue`]. A single
//! coalescing [`alarm::AlarmDriver`] is kept armed for the earliest wake
//! time. Each fire goes through a [`debounce::Debouncer`] into
//! [`engine::WakeupEngine::handle_scheduled_wakeup`], which:
//!
//! 1. claims a one-minute window by bumping the session-scoped threshold
//!    (a fire inside an already-claimed window does nothing),
//! 2. removes every entry due within the window, re-enqueueing periodic ones
//!    at their next occurrence,
//! 3. opens the woken tabs and records one-shots on the undo stack,
//! 4. re-arms the alarm for the next earliest entry, or cancels it.
//!
//! [`idle::IdleMonitor`] cancels the alarm while the system is idle and
//! re-arms it shortly after the system becomes active again.
//!
//! # Pass states
//!
//! ```text
//! Idle -> Thresholding -> Waking -> Rescheduling -> Idle
//!              |
//!              +-- window already claimed --> Idle
//! ```

pub mod alarm;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod host;
pub mod idle;
pub mod schedule;
pub mod snooze;

pub use alarm::{AlarmDriver, Signal, TokioAlarm};
pub use engine::{AlarmMode, WakeReport, WakeupEngine, WakeupOutcome, WAKEUP_ALARM_NAME};
pub use error::{HostError, Result, SchedulerError};
pub use host::{Clock, Notifier, SystemClock, TabHost};
pub use idle::{IdleMonitor, IdleState};
pub use schedule::{PeriodCalculator, Zone};
pub use snooze::SnoozeRequest;
