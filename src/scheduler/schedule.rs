// Cron Schedules
//
// Five-field cron expressions (minute hour day-of-month month day-of-week)
// evaluated in UTC. Fields accept `*`, numbers, lists, ranges and `/step`.
// When both day fields are restricted a day matches if either one does.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Timelike,
    Utc,
};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },
}

// Give up looking for a match after this many days (covers Feb 29)
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let trimmed = expr.trim();
        let expanded = match trimmed {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], "day-of-week", 0, 7)?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: trimmed.to_string(),
            minutes: parse_field(fields[0], "minute", 0, 59)?,
            hours: parse_field(fields[1], "hour", 0, 23)?,
            days_of_month: parse_field(fields[2], "day-of-month", 1, 31)?,
            months: parse_field(fields[3], "month", 1, 12)?,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First matching minute strictly after `after`
    ///
    /// `None` when the expression never fires (e.g. February 30th).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after
            .naive_utc()
            .with_second(0)?
            .with_nanosecond(0)?
            + ChronoDuration::minutes(1);
        let horizon = start + ChronoDuration::days(SEARCH_HORIZON_DAYS);

        let mut t = start;
        while t <= horizon {
            if !bit(self.months, t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = (t.date() + ChronoDuration::days(1)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + ChronoDuration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += ChronoDuration::minutes(1);
                continue;
            }
            return Some(Utc.from_utc_datetime(&t));
        }
        None
    }

    /// Whether `at` (truncated to the minute) is a firing time
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        bit(self.months, at.month())
            && self.day_matches(at.date_naive())
            && bit(self.hours, at.hour())
            && bit(self.minutes, at.minute())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_field(expr: &str, field: &'static str, min: u32, max: u32) -> Result<u64, ScheduleError> {
    let invalid = || ScheduleError::InvalidField {
        field,
        value: expr.to_string(),
    };
    let number = |s: &str| -> Result<u32, ScheduleError> {
        let n: u32 = s.parse().map_err(|_| invalid())?;
        if n < min || n > max {
            return Err(invalid());
        }
        Ok(n)
    };

    let mut mask = 0u64;
    for part in expr.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let (a, b) = (number(a)?, number(b)?);
            if a > b {
                return Err(invalid());
            }
            (a, b)
        } else {
            let a = number(range)?;
            // `5/10` means every 10 starting at 5
            if step.is_some() {
                (a, max)
            } else {
                (a, a)
            }
        };

        let step = step.unwrap_or(1) as usize;
        for value in (lo..=hi).step_by(step) {
            mask |= 1u64 << value;
        }
    }

    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_daily_schedule() {
        let cron = CronSchedule::parse("0 2 * * *").unwrap();
        assert_eq!(
            cron.next_after(at("2026-01-01T03:00:00Z")),
            Some(at("2026-01-02T02:00:00Z"))
        );
        assert_eq!(
            cron.next_after(at("2026-01-01T01:59:30Z")),
            Some(at("2026-01-01T02:00:00Z"))
        );
    }

    #[test]
    fn test_next_is_strictly_after() {
        let cron = CronSchedule::parse("0 2 * * *").unwrap();
        assert_eq!(
            cron.next_after(at("2026-01-01T02:00:00Z")),
            Some(at("2026-01-02T02:00:00Z"))
        );
    }

    #[test]
    fn test_weekly_on_sunday() {
        let cron = CronSchedule::parse("0 3 * * 0").unwrap();
        // 2026-10-19 is a Monday
        assert_eq!(
            cron.next_after(at("2026-10-19T12:00:00Z")),
            Some(at("2026-10-25T03:00:00Z"))
        );
        let alias = CronSchedule::parse("0 3 * * 7").unwrap();
        assert_eq!(
            alias.next_after(at("2026-10-19T12:00:00Z")),
            Some(at("2026-10-25T03:00:00Z"))
        );
    }

    #[test]
    fn test_monthly_rolls_over_year() {
        let cron = CronSchedule::parse("0 4 1 * *").unwrap();
        assert_eq!(
            cron.next_after(at("2026-12-15T00:00:00Z")),
            Some(at("2027-01-01T04:00:00Z"))
        );
    }

    #[test]
    fn test_steps_lists_and_ranges() {
        let cron = CronSchedule::parse("*/15 9-17 * * 1-5").unwrap();
        assert_eq!(
            cron.next_after(at("2026-10-19T10:07:00Z")),
            Some(at("2026-10-19T10:15:00Z"))
        );
        assert_eq!(
            cron.next_after(at("2026-10-19T17:45:00Z")),
            Some(at("2026-10-20T09:00:00Z"))
        );

        let list = CronSchedule::parse("5,35 * * * *").unwrap();
        assert_eq!(
            list.next_after(at("2026-10-19T10:06:00Z")),
            Some(at("2026-10-19T10:35:00Z"))
        );
    }

    #[test]
    fn test_day_fields_are_ored_when_both_restricted() {
        // 1st of the month or any Sunday
        let cron = CronSchedule::parse("0 0 1 * 0").unwrap();
        assert!(cron.matches(at("2026-10-18T00:00:00Z")));
        assert!(cron.matches(at("2026-12-01T00:00:00Z")));
        assert!(!cron.matches(at("2026-10-19T00:00:00Z")));
    }

    #[test]
    fn test_aliases() {
        assert_eq!(
            CronSchedule::parse("@hourly").unwrap().next_after(at("2026-10-19T10:07:00Z")),
            Some(at("2026-10-19T11:00:00Z"))
        );
        assert_eq!(CronSchedule::parse("@daily").unwrap().to_string(), "@daily");
    }

    #[test]
    fn test_impossible_date_never_fires() {
        let cron = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(at("2026-01-01T00:00:00Z")), None);
    }

    #[test]
    fn test_invalid_expressions() {
        assert_eq!(
            CronSchedule::parse("* * *"),
            Err(ScheduleError::FieldCount(3))
        );
        for bad in [
            "61 * * * *",
            "* 24 * * *",
            "*/0 * * * *",
            "5-1 * * * *",
            "a * * * *",
            "* * 0 * *",
        ] {
            assert!(CronSchedule::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }
}
