use chrono::{DateTime, Days, FixedOffset, Local, TimeZone, Utc};
use snoozer_core::{RecurrenceRule, SnoozeEntry, SnoozerError};

use crate::error::{Result, SchedulerError};

/// Longest gap between two occurrences of any rule (monthly, plus slack for
/// days skipped by DST gaps).
const MAX_LOOKAHEAD_DAYS: u64 = 400;

/// Time zone in which rule times of day are interpreted.
#[derive(Debug, Clone, Copy, Default)]
pub enum Zone {
    /// The host's local time zone, DST included.
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
}

/// Computes the next occurrence of a [`RecurrenceRule`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodCalculator {
    zone: Zone,
}

impl PeriodCalculator {
    pub fn new(zone: Zone) -> Self {
        Self { zone }
    }

    pub fn utc() -> Self {
        Self::new(Zone::Utc)
    }

    /// Next occurrence of `rule` strictly after `from`.
    ///
    /// Fails only for rules that do not validate.
    pub fn next_occurrence(&self, rule: &RecurrenceRule, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self.zone {
            Zone::Local => next_occurrence_in(rule, from, &Local),
            Zone::Utc => next_occurrence_in(rule, from, &Utc),
            Zone::Fixed(offset) => next_occurrence_in(rule, from, &offset),
        }
    }

    /// Copy of a periodic `entry` moved to its next occurrence.
    ///
    /// The new wake time is after both `now` and the entry's current `when`,
    /// so an entry woken slightly early is never handed the same slot again.
    pub fn renew(&self, entry: &SnoozeEntry, now: DateTime<Utc>) -> Result<SnoozeEntry> {
        let Some(rule) = &entry.period else {
            return Err(SchedulerError::MissingPeriod {
                url: entry.url.clone(),
            });
        };
        let from = now.max(entry.when);
        let mut renewed = entry.clone();
        renewed.when = self.next_occurrence(rule, from)?;
        Ok(renewed)
    }
}

/// Next occurrence of `rule` in `tz` strictly after `from`.
pub fn next_occurrence_in<Tz: TimeZone>(
    rule: &RecurrenceRule,
    from: DateTime<Utc>,
    tz: &Tz,
) -> Result<DateTime<Utc>> {
    rule.validate()?;
    let (hour, minute) = rule.time_of_day();
    let start = from.with_timezone(tz).date_naive();

    for offset in 0..=MAX_LOOKAHEAD_DAYS {
        let Some(day) = start.checked_add_days(Days::new(offset)) else {
            break;
        };
        if !rule.matches_day(day) {
            continue;
        }
        let Some(naive) = day.and_hms_opt(hour, minute, 0) else {
            continue;
        };
        // A wall-clock time skipped by a DST jump has no instant; try the next day.
        let Some(candidate) = tz.from_local_datetime(&naive).earliest() else {
            continue;
        };
        let candidate = candidate.with_timezone(&Utc);
        if candidate > from {
            return Ok(candidate);
        }
        // Today's slot has passed; keep scanning forward.
    }

    Err(SnoozerError::InvalidRule(format!(
        "no occurrence within {MAX_LOOKAHEAD_DAYS} days of {from}"
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, Timelike, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_before_slot_is_today() {
        let rule = RecurrenceRule::Daily { hour: 9, minute: 0 };
        let next = PeriodCalculator::utc()
            .next_occurrence(&rule, at(2026, 10, 19, 8, 30))
            .unwrap();
        assert_eq!(next, at(2026, 10, 19, 9, 0));
    }

    #[test]
    fn daily_after_slot_rolls_to_tomorrow() {
        let rule = RecurrenceRule::Daily { hour: 9, minute: 0 };
        let calc = PeriodCalculator::utc();
        assert_eq!(
            calc.next_occurrence(&rule, at(2026, 10, 19, 9, 0)).unwrap(),
            at(2026, 10, 20, 9, 0),
            "exactly at the slot is not strictly after"
        );
        assert_eq!(
            calc.next_occurrence(&rule, at(2026, 10, 19, 17, 45)).unwrap(),
            at(2026, 10, 20, 9, 0)
        );
    }

    #[test]
    fn workdays_skip_the_weekend() {
        // 2026-10-23 is a Friday.
        let rule = RecurrenceRule::Workdays { hour: 8, minute: 30 };
        let next = PeriodCalculator::utc()
            .next_occurrence(&rule, at(2026, 10, 23, 12, 0))
            .unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next, at(2026, 10, 26, 8, 30));
    }

    #[test]
    fn weekends_from_monday() {
        let rule = RecurrenceRule::Weekends { hour: 10, minute: 0 };
        let next = PeriodCalculator::utc()
            .next_occurrence(&rule, at(2026, 10, 19, 12, 0))
            .unwrap();
        assert_eq!(next, at(2026, 10, 24, 10, 0));
    }

    #[test]
    fn weekly_picks_nearest_listed_day() {
        // Tuesday and Thursday; from Tuesday afternoon → Thursday.
        let rule = RecurrenceRule::Weekly { days: vec![1, 3], hour: 9, minute: 15 };
        let next = PeriodCalculator::utc()
            .next_occurrence(&rule, at(2026, 10, 20, 15, 0))
            .unwrap();
        assert_eq!(next, at(2026, 10, 22, 9, 15));
    }

    #[test]
    fn monthly_clamps_short_months() {
        let rule = RecurrenceRule::Monthly { day: 31, hour: 7, minute: 0 };
        let next = PeriodCalculator::utc()
            .next_occurrence(&rule, at(2026, 2, 1, 0, 0))
            .unwrap();
        assert_eq!(next, at(2026, 2, 28, 7, 0));
    }

    #[test]
    fn fixed_offset_uses_local_time_of_day() {
        let plus2 = FixedOffset::east_opt(2 * 3600).unwrap();
        let rule = RecurrenceRule::Daily { hour: 9, minute: 0 };
        let next = PeriodCalculator::new(Zone::Fixed(plus2))
            .next_occurrence(&rule, at(2026, 10, 19, 6, 0))
            .unwrap();
        // 09:00 at +02:00 is 07:00 UTC.
        assert_eq!(next, at(2026, 10, 19, 7, 0));
    }

    #[test]
    fn always_strictly_after_from() {
        let rules = [
            RecurrenceRule::Daily { hour: 0, minute: 0 },
            RecurrenceRule::Daily { hour: 23, minute: 59 },
            RecurrenceRule::Workdays { hour: 9, minute: 0 },
            RecurrenceRule::Weekends { hour: 18, minute: 30 },
            RecurrenceRule::Weekly { days: vec![6], hour: 12, minute: 0 },
            RecurrenceRule::Monthly { day: 29, hour: 9, minute: 0 },
        ];
        let calc = PeriodCalculator::utc();
        let mut from = at(2026, 1, 1, 0, 0);
        // Every 7h13m across a little more than a year.
        while from < at(2027, 2, 1, 0, 0) {
            for rule in &rules {
                let next = calc.next_occurrence(rule, from).unwrap();
                assert!(next > from, "{rule:?} from {from} gave {next}");
                assert_eq!(next.second(), 0);
            }
            from += Duration::minutes(7 * 60 + 13);
        }
    }

    #[test]
    fn invalid_rule_is_an_error() {
        let rule = RecurrenceRule::Daily { hour: 25, minute: 0 };
        assert!(matches!(
            PeriodCalculator::utc().next_occurrence(&rule, Utc::now()),
            Err(SchedulerError::Invalid(_))
        ));
    }

    #[test]
    fn renew_requires_a_period() {
        let entry = SnoozeEntry {
            url: "https://x/a".to_string(),
            title: None,
            favicon: None,
            kind: None,
            sleep_start: at(2026, 10, 18, 9, 0),
            when: at(2026, 10, 19, 9, 0),
            period: None,
        };
        assert!(matches!(
            PeriodCalculator::utc().renew(&entry, at(2026, 10, 19, 9, 0)),
            Err(SchedulerError::MissingPeriod { .. })
        ));
    }

    #[test]
    fn renew_moves_past_current_slot_even_when_early() {
        let entry = SnoozeEntry {
            url: "https://x/a".to_string(),
            title: None,
            favicon: None,
            kind: None,
            sleep_start: at(2026, 10, 18, 9, 0),
            when: at(2026, 10, 19, 9, 0),
            period: Some(RecurrenceRule::Daily { hour: 9, minute: 0 }),
        };
        // woken 30 s early because of the one-minute wakeup window
        let now = at(2026, 10, 19, 9, 0) - Duration::seconds(30);
        let renewed = PeriodCalculator::utc().renew(&entry, now).unwrap();
        assert_eq!(renewed.when, at(2026, 10, 20, 9, 0));
        assert_eq!(renewed.sleep_start, entry.sleep_start);
    }
}
