//! Schedule calculation: when does a job fire next?
//!
//! [`next_run_at_ms`] is a pure function of the schedule, the last run
//! instant, and "now"; the scheduler engine calls it on creation, update,
//! startup recovery, and after every completed run.

use chrono::{Local, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use super::cron::{CronError, CronExpr};
use super::job::Schedule;

/// Errors that make a schedule invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Malformed cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(#[from] CronError),

    /// Unknown IANA timezone name.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Non-positive interval.
    #[error("interval must be positive, got {0}ms")]
    InvalidInterval(i64),

    /// A single-shot instant that has already passed.
    #[error("scheduled instant is in the past")]
    InstantInPast,
}

/// Check that a schedule is acceptable at creation/update time.
pub fn validate(schedule: &Schedule, now_ms: i64) -> Result<(), ScheduleError> {
    match schedule {
        Schedule::At { at_ms } => {
            if *at_ms <= now_ms {
                Err(ScheduleError::InstantInPast)
            } else {
                Ok(())
            }
        }
        Schedule::Every { every_ms } => {
            if *every_ms <= 0 {
                Err(ScheduleError::InvalidInterval(*every_ms))
            } else {
                Ok(())
            }
        }
        Schedule::Cron { expr, tz } => {
            CronExpr::parse(expr)?;
            if let Some(tz) = tz {
                tz.parse::<Tz>()
                    .map_err(|_| ScheduleError::InvalidTimezone(tz.clone()))?;
            }
            Ok(())
        }
    }
}

/// Compute the next fire instant, or `None` when the job will not fire
/// again (spent one-shot, unsatisfiable cron).
///
/// Rules:
/// - `at`: the instant itself while in the future and never run.
/// - `every`: `last + every`, falling forward to the next grid point after
///   `now` when that has already passed, so a paused scheduler never
///   produces a catch-up burst.
/// - `cron`: the smallest matching instant strictly after
///   `max(last_run, now)`, evaluated in the schedule's timezone.
pub fn next_run_at_ms(
    schedule: &Schedule,
    last_run_at_ms: Option<i64>,
    now_ms: i64,
) -> Result<Option<i64>, ScheduleError> {
    match schedule {
        Schedule::At { at_ms } => {
            Ok((last_run_at_ms.is_none() && *at_ms > now_ms).then_some(*at_ms))
        }
        Schedule::Every { every_ms } => {
            let every = *every_ms;
            if every <= 0 {
                return Err(ScheduleError::InvalidInterval(every));
            }
            let next = match last_run_at_ms {
                None => now_ms + every,
                Some(last) => {
                    let next = last.saturating_add(every);
                    if next > now_ms {
                        next
                    } else {
                        now_ms + (every - ((now_ms - last) % every))
                    }
                }
            };
            Ok(Some(next))
        }
        Schedule::Cron { expr, tz } => {
            let parsed = CronExpr::parse(expr)?;
            let base_ms = last_run_at_ms.map_or(now_ms, |last| last.max(now_ms));
            let Some(base) = Utc.timestamp_millis_opt(base_ms).single() else {
                return Ok(None);
            };
            let next = match tz.as_deref() {
                Some(name) => {
                    let zone: Tz = name
                        .parse()
                        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))?;
                    parsed
                        .next_after(base.with_timezone(&zone))
                        .map(|dt| dt.timestamp_millis())
                }
                None => parsed
                    .next_after(base.with_timezone(&Local))
                    .map(|dt| dt.timestamp_millis()),
            };
            Ok(next)
        }
    }
}
