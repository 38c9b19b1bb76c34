//! One-shot CLI commands. They share storage with the running daemon, which
//! picks up their changes on its next resync.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Local, TimeDelta, Utc};
use clap::{ArgGroup, Args};
use snoozer_core::config::SnoozerConfig;
use snoozer_core::{RecurrenceRule, TabInfo};
use snoozer_scheduler::{SnoozeRequest, WakeupEngine, WakeupOutcome};

use crate::host::{CommandTabHost, DetachedAlarm};
use crate::{build_engine, Stores};

#[derive(Args)]
#[command(group(
    ArgGroup::new("wake_time")
        .required(true)
        .args(["at", "in_minutes", "daily", "workdays", "weekends"])
))]
pub struct SnoozeArgs {
    pub url: String,

    #[arg(long)]
    pub title: Option<String>,

    /// Absolute wake time (RFC 3339, e.g. 2026-10-20T09:00:00+02:00)
    #[arg(long, value_parser = parse_rfc3339)]
    pub at: Option<DateTime<Utc>>,

    #[arg(long)]
    pub in_minutes: Option<u32>,

    /// Every day at HH:MM
    #[arg(long, value_name = "HH:MM")]
    pub daily: Option<TimeOfDay>,

    /// Monday to Friday at HH:MM
    #[arg(long, value_name = "HH:MM")]
    pub workdays: Option<TimeOfDay>,

    /// Saturday and Sunday at HH:MM
    #[arg(long, value_name = "HH:MM")]
    pub weekends: Option<TimeOfDay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got '{s}'"))?;
        let hour: u8 = h.trim().parse().map_err(|_| format!("bad hour in '{s}'"))?;
        let minute: u8 = m.trim().parse().map_err(|_| format!("bad minute in '{s}'"))?;
        if hour > 23 || minute > 59 {
            return Err(format!("'{s}' is not a time of day"));
        }
        Ok(Self { hour, minute })
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

impl SnoozeArgs {
    fn request(&self) -> SnoozeRequest {
        let period = if let Some(t) = self.daily {
            Some(RecurrenceRule::Daily { hour: t.hour, minute: t.minute })
        } else if let Some(t) = self.workdays {
            Some(RecurrenceRule::Workdays { hour: t.hour, minute: t.minute })
        } else {
            self.weekends
                .map(|t| RecurrenceRule::Weekends { hour: t.hour, minute: t.minute })
        };
        let wake_at = self.at.or_else(|| {
            self.in_minutes
                .map(|m| Utc::now() + TimeDelta::minutes(i64::from(m)))
        });
        let kind = if period.is_some() {
            "periodically"
        } else if self.in_minutes.is_some() {
            "in_minutes"
        } else {
            "custom"
        };
        SnoozeRequest {
            wake_at,
            period,
            kind: Some(kind.to_string()),
            close_tab: false,
        }
    }
}

fn engine(config: &SnoozerConfig, stores: &Stores) -> WakeupEngine {
    build_engine(
        config,
        stores,
        Arc::new(DetachedAlarm::default()),
        Arc::new(CommandTabHost::new(&config.browser)),
    )
}

fn local(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub async fn snooze(config: &SnoozerConfig, stores: &Stores, args: SnoozeArgs) -> anyhow::Result<()> {
    let tab = TabInfo {
        id: 0,
        url: args.url.clone(),
        title: args.title.clone(),
        favicon: None,
    };
    let entry = engine(config, stores).snooze_tab(&tab, args.request()).await?;
    println!("Snoozed {} until {}", entry.display_title(), local(entry.when));
    Ok(())
}

pub async fn list(stores: &Stores, undo: bool) -> anyhow::Result<()> {
    if undo {
        let stack = stores.queue.list_undo().await?;
        if stack.is_empty() {
            println!("Nothing woke up recently.");
        }
        for item in stack {
            println!(
                "{}  {}  (woke {})",
                local(item.entry.when),
                item.entry.url,
                local(item.awoken_at)
            );
        }
        return Ok(());
    }

    let mut pending = stores.queue.list_pending().await?;
    if pending.is_empty() {
        println!("No snoozed tabs.");
        return Ok(());
    }
    pending.sort_by_key(|e| e.when);
    for e in pending {
        let repeat = if e.is_periodic() { "  (repeats)" } else { "" };
        println!("{}  {}  {}{}", local(e.when), e.url, e.display_title(), repeat);
    }
    Ok(())
}

pub async fn undo(config: &SnoozerConfig, stores: &Stores) -> anyhow::Result<()> {
    match engine(config, stores).undo().await? {
        Some(entry) => println!("Back to sleep: {}", entry.display_title()),
        None => println!("Nothing to undo."),
    }
    Ok(())
}

pub async fn delete(config: &SnoozerConfig, stores: &Stores, url: &str) -> anyhow::Result<()> {
    let targets: Vec<_> = stores
        .queue
        .list_pending()
        .await?
        .into_iter()
        .filter(|e| e.url == url)
        .collect();
    if targets.is_empty() {
        bail!("no snoozed tab for {url}");
    }
    let removed = engine(config, stores).delete_entries(&targets).await?;
    println!("Deleted {removed} snooze(s) for {url}");
    Ok(())
}

pub async fn wake(config: &SnoozerConfig, stores: &Stores) -> anyhow::Result<()> {
    match engine(config, stores).handle_scheduled_wakeup().await? {
        WakeupOutcome::AlreadyClaimed { until } => {
            println!("A wakeup already ran; next pass after {}", local(until));
        }
        WakeupOutcome::Woke(report) if report.woken.is_empty() => println!("Nothing due."),
        WakeupOutcome::Woke(report) => {
            for e in &report.woken {
                println!("Woke {}", e.url);
            }
        }
    }
    Ok(())
}
