//! Cron expression parsing and next-occurrence search.
//!
//! Supports standard 5-field expressions (minute, hour, day-of-month,
//! month, day-of-week) and extended 6-field expressions with a leading
//! seconds field. Fields accept `*`, single values, ranges, steps, lists,
//! and three-letter month/weekday names; `7` is accepted as Sunday.
//!
//! Day-of-month and day-of-week combine with the classical convention:
//! when both fields are restricted a day matches if *either* matches,
//! otherwise both must match.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike,
};
use thiserror::Error;

/// Upper bound on the forward search. A cron expression with no occurrence
/// within this window (e.g. `0 0 30 2 *`) is treated as unsatisfiable.
const SEARCH_HORIZON_DAYS: i64 = 366 * 4;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const DAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Errors that can occur when parsing a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    /// Wrong number of whitespace-separated fields.
    #[error("expected 5 or 6 fields, got {0}")]
    FieldCount(usize),

    /// A field term could not be parsed.
    #[error("invalid field term: {0:?}")]
    InvalidField(String),

    /// A field value is outside the permitted range.
    #[error("value {value} out of range {min}..={max}")]
    OutOfRange { value: u32, min: u32, max: u32 },
}

/// Set of permitted values for one cron field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    mask: u64,
    /// False only when the field was the bare wildcard `*`.
    restricted: bool,
}

impl FieldSet {
    fn exactly(value: u32) -> Self {
        Self {
            mask: 1u64 << value,
            restricted: true,
        }
    }

    fn contains(&self, value: u32) -> bool {
        value < 64 && self.mask & (1u64 << value) != 0
    }

    fn next_at_or_after(&self, from: u32, max: u32) -> Option<u32> {
        (from..=max).find(|v| self.contains(*v))
    }

    /// Remap `7` to `0` in the day-of-week field.
    fn fold_sunday(&mut self) {
        if self.contains(7) {
            self.mask &= !(1u64 << 7);
            self.mask |= 1;
        }
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronExpr {
    /// Parse a 5- or 6-field cron expression.
    ///
    /// A 5-field expression fires at second zero of each matching minute.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let offset = match fields.len() {
            5 => 0,
            6 => 1,
            n => return Err(CronError::FieldCount(n)),
        };

        let seconds = if offset == 1 {
            Self::parse_field(fields[0], 0, 59, &[])?
        } else {
            FieldSet::exactly(0)
        };
        let minutes = Self::parse_field(fields[offset], 0, 59, &[])?;
        let hours = Self::parse_field(fields[offset + 1], 0, 23, &[])?;
        let days_of_month = Self::parse_field(fields[offset + 2], 1, 31, &[])?;
        let months = Self::parse_field(fields[offset + 3], 1, 12, MONTH_NAMES)?;
        let mut days_of_week = Self::parse_field(fields[offset + 4], 0, 7, DAY_NAMES)?;
        days_of_week.fold_sunday();

        Ok(Self {
            seconds,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
        })
    }

    /// Parse a single field into its value set.
    fn parse_field(
        spec: &str,
        min: u32,
        max: u32,
        names: &[&str],
    ) -> Result<FieldSet, CronError> {
        if spec.is_empty() {
            return Err(CronError::InvalidField(spec.to_string()));
        }

        let mut mask: u64 = 0;
        for term in spec.split(',') {
            let (range, step) = match term.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| CronError::InvalidField(term.to_string()))?;
                    if step == 0 {
                        return Err(CronError::InvalidField(term.to_string()));
                    }
                    (range, step)
                }
                None => (term, 1),
            };

            let (lo, hi) = if range == "*" {
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (
                    Self::parse_value(a, min, max, names)?,
                    Self::parse_value(b, min, max, names)?,
                )
            } else {
                let value = Self::parse_value(range, min, max, names)?;
                // A bare value with a step means "from value to max".
                if term.contains('/') {
                    (value, max)
                } else {
                    (value, value)
                }
            };

            if lo > hi {
                return Err(CronError::InvalidField(term.to_string()));
            }

            let mut v = lo;
            while v <= hi {
                mask |= 1u64 << v;
                v += step;
            }
        }

        Ok(FieldSet {
            mask,
            restricted: spec != "*",
        })
    }

    /// Parse a numeric value or a three-letter name.
    fn parse_value(s: &str, min: u32, max: u32, names: &[&str]) -> Result<u32, CronError> {
        let value = if let Ok(n) = s.parse::<u32>() {
            n
        } else {
            let lower = s.to_ascii_lowercase();
            let pos = names
                .iter()
                .position(|name| *name == lower)
                .ok_or_else(|| CronError::InvalidField(s.to_string()))?;
            // Name tables start at the field minimum.
            min + pos as u32
        };
        if value < min || value > max {
            return Err(CronError::OutOfRange { value, min, max });
        }
        Ok(value)
    }

    /// Find the first instant strictly after `after` that matches this
    /// expression, evaluated in `after`'s timezone.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier
    /// instant; nonexistent local times (spring-forward gap) are skipped.
    pub fn next_after<Tz: TimeZone>(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = (after.naive_local() + Duration::seconds(1)).with_nanosecond(0)?;
        let horizon = start.date() + Duration::days(SEARCH_HORIZON_DAYS);

        let mut date = start.date();
        let mut floor = Some(start.time());

        while date <= horizon {
            if !self.months.contains(date.month()) {
                date = next_month_start(date)?;
                floor = None;
                continue;
            }
            if !self.day_matches(date) {
                date = date.succ_opt()?;
                floor = None;
                continue;
            }

            let mut t = floor.take().unwrap_or(NaiveTime::MIN);
            loop {
                let Some(matched) = self.next_time_at_or_after(t) else {
                    break;
                };
                match tz.from_local_datetime(&NaiveDateTime::new(date, matched)) {
                    LocalResult::Single(dt) => return Some(dt),
                    LocalResult::Ambiguous(earliest, _) => return Some(earliest),
                    LocalResult::None => {
                        let (bumped, wrapped) = matched.overflowing_add_signed(Duration::seconds(1));
                        if wrapped != 0 {
                            break;
                        }
                        t = bumped;
                    }
                }
            }

            date = date.succ_opt()?;
        }

        None
    }

    /// Day match under the classical DOM/DOW combination rule.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// Smallest matching time-of-day at or after `t`, if any remains today.
    fn next_time_at_or_after(&self, t: NaiveTime) -> Option<NaiveTime> {
        let mut h = t.hour();
        let mut m = t.minute();
        let mut s = t.second();
        loop {
            let nh = self.hours.next_at_or_after(h, 23)?;
            if nh != h {
                h = nh;
                m = 0;
                s = 0;
            }
            let nm = match self.minutes.next_at_or_after(m, 59) {
                Some(v) => v,
                None => {
                    h += 1;
                    if h > 23 {
                        return None;
                    }
                    m = 0;
                    s = 0;
                    continue;
                }
            };
            if nm != m {
                m = nm;
                s = 0;
            }
            match self.seconds.next_at_or_after(s, 59) {
                Some(ns) => return NaiveTime::from_hms_opt(h, m, ns),
                None => {
                    m += 1;
                    s = 0;
                    if m > 59 {
                        h += 1;
                        m = 0;
                        if h > 23 {
                            return None;
                        }
                    }
                }
            }
        }
    }
}

fn next_month_start(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}
