use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnoozerError};

/// Recurrence of a periodic snooze, evaluated in the calculator's local time.
///
/// Weekday numbers follow ISO ordering: 0 = Monday … 6 = Sunday, matching
/// chrono's `num_days_from_monday`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Every day at HH:MM.
    Daily { hour: u8, minute: u8 },

    /// Monday to Friday at HH:MM.
    Workdays { hour: u8, minute: u8 },

    /// Saturday and Sunday at HH:MM.
    Weekends { hour: u8, minute: u8 },

    /// On each listed weekday at HH:MM.
    Weekly { days: Vec<u8>, hour: u8, minute: u8 },

    /// On the given day of every month at HH:MM. Days past the end of a
    /// short month land on its last day.
    Monthly { day: u8, hour: u8, minute: u8 },
}

impl RecurrenceRule {
    /// Hour and minute of the occurrence.
    pub fn time_of_day(&self) -> (u32, u32) {
        let (h, m) = match self {
            RecurrenceRule::Daily { hour, minute }
            | RecurrenceRule::Workdays { hour, minute }
            | RecurrenceRule::Weekends { hour, minute }
            | RecurrenceRule::Weekly { hour, minute, .. }
            | RecurrenceRule::Monthly { hour, minute, .. } => (*hour, *minute),
        };
        (h as u32, m as u32)
    }

    /// Reject rules that can never produce an occurrence.
    pub fn validate(&self) -> Result<()> {
        let (hour, minute) = self.time_of_day();
        if hour > 23 || minute > 59 {
            return Err(SnoozerError::InvalidRule(format!(
                "time of day {hour:02}:{minute:02} is out of range"
            )));
        }
        match self {
            RecurrenceRule::Weekly { days, .. } => {
                if days.is_empty() {
                    return Err(SnoozerError::InvalidRule(
                        "weekly rule needs at least one day".to_string(),
                    ));
                }
                if let Some(bad) = days.iter().find(|d| **d > 6) {
                    return Err(SnoozerError::InvalidRule(format!(
                        "weekday {bad} is out of range (0 = Monday … 6 = Sunday)"
                    )));
                }
            }
            RecurrenceRule::Monthly { day, .. } => {
                if !(1..=31).contains(day) {
                    return Err(SnoozerError::InvalidRule(format!(
                        "day of month {day} is out of range"
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether `date` is one of the days this rule fires on.
    pub fn matches_day(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;

        let weekday = date.weekday();
        match self {
            RecurrenceRule::Daily { .. } => true,
            RecurrenceRule::Workdays { .. } => !matches!(weekday, Weekday::Sat | Weekday::Sun),
            RecurrenceRule::Weekends { .. } => matches!(weekday, Weekday::Sat | Weekday::Sun),
            RecurrenceRule::Weekly { days, .. } => {
                days.contains(&(weekday.num_days_from_monday() as u8))
            }
            RecurrenceRule::Monthly { day, .. } => {
                date.day() == (*day as u32).min(days_in_month(date))
            }
        }
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    use chrono::Datelike;

    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// A pending snoozed tab, stored as one element of the pending array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoozeEntry {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub favicon: Option<String>,
    /// Which snooze option the user picked (e.g. "tomorrow", "custom").
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sleep_start: DateTime<Utc>,
    /// Absolute wake time.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub when: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<RecurrenceRule>,
}

impl SnoozeEntry {
    /// Title for log lines and error messages; falls back to the URL.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.url)
    }

    pub fn is_periodic(&self) -> bool {
        self.period.is_some()
    }

    /// Reject entries that could not be turned back into a tab.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(SnoozerError::EmptyUrl {
                title: self.title.clone().unwrap_or_default(),
            });
        }
        if let Some(rule) = &self.period {
            rule.validate()?;
        }
        Ok(())
    }

    /// Identity used when removing entries from the pending set.
    pub fn is_same_snooze(&self, other: &SnoozeEntry) -> bool {
        self.url == other.url && self.sleep_start == other.sleep_start && self.when == other.when
    }
}

/// A woken entry kept on the undo stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoItem {
    #[serde(flatten)]
    pub entry: SnoozeEntry,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub awoken_at: DateTime<Utc>,
}

impl UndoItem {
    pub fn capture(entry: SnoozeEntry, awoken_at: DateTime<Utc>) -> Self {
        Self { entry, awoken_at }
    }

    /// Strip the wake stamp, yielding the entry as it was before waking.
    pub fn into_entry(self) -> SnoozeEntry {
        self.entry
    }
}

/// A live browser tab as reported by the tab host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: u64,
    pub url: String,
    pub title: Option<String>,
    pub favicon: Option<String>,
}

/// A tab created by the tab host while waking entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabHandle {
    pub id: u64,
    pub url: String,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(url: &str) -> SnoozeEntry {
        SnoozeEntry {
            url: url.to_string(),
            title: Some("Docs".to_string()),
            favicon: None,
            kind: Some("tomorrow".to_string()),
            sleep_start: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            when: Utc.timestamp_millis_opt(1_700_086_400_000).unwrap(),
            period: None,
        }
    }

    #[test]
    fn entry_uses_host_storage_shape() {
        let json = serde_json::to_value(entry("https://x/a")).unwrap();
        assert_eq!(json["url"], "https://x/a");
        assert_eq!(json["type"], "tomorrow");
        assert_eq!(json["sleepStart"], 1_700_000_000_000_i64);
        assert_eq!(json["when"], 1_700_086_400_000_i64);
        // period is omitted entirely for one-shot snoozes
        assert!(json.get("period").is_none());
    }

    #[test]
    fn undo_item_flattens_entry_and_adds_stamp() {
        let awoken = Utc.timestamp_millis_opt(1_700_086_400_500).unwrap();
        let item = UndoItem::capture(entry("https://x/a"), awoken);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["awokenAt"], 1_700_086_400_500_i64);
        assert_eq!(json["url"], "https://x/a");

        let back: UndoItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.into_entry(), entry("https://x/a"));
    }

    #[test]
    fn empty_url_is_rejected() {
        let err = entry("   ").validate().unwrap_err();
        assert_eq!(err.code(), "EMPTY_URL");
    }

    #[test]
    fn rule_validation() {
        assert!(RecurrenceRule::Daily { hour: 9, minute: 0 }.validate().is_ok());
        assert!(RecurrenceRule::Daily { hour: 24, minute: 0 }.validate().is_err());
        assert!(RecurrenceRule::Weekly { days: vec![], hour: 9, minute: 0 }
            .validate()
            .is_err());
        assert!(RecurrenceRule::Weekly { days: vec![7], hour: 9, minute: 0 }
            .validate()
            .is_err());
        assert!(RecurrenceRule::Monthly { day: 0, hour: 9, minute: 0 }
            .validate()
            .is_err());
    }

    #[test]
    fn monthly_clamps_to_last_day() {
        let rule = RecurrenceRule::Monthly { day: 31, hour: 9, minute: 0 };
        assert!(rule.matches_day(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()));
        assert!(!rule.matches_day(NaiveDate::from_ymd_opt(2026, 2, 27).unwrap()));
        assert!(rule.matches_day(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap()));
    }

    #[test]
    fn identity_ignores_title() {
        let a = entry("https://x/a");
        let mut b = a.clone();
        b.title = Some("Renamed".to_string());
        assert!(a.is_same_snooze(&b));
        b.when = b.when + chrono::Duration::minutes(1);
        assert!(!a.is_same_snooze(&b));
    }
}
