//! Recurrence rules.
//!
//! All wall-clock arithmetic is done in UTC, so there are no DST gaps or
//! repeated hours to account for.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use taskhive_config::ScheduleSpec;

use crate::error::SchedulerError;

/// A parsed cron expression (six or seven fields, seconds first).
#[derive(Clone)]
pub struct CronExpr {
    expr: String,
    schedule: cron::Schedule,
}

impl CronExpr {
    pub fn as_str(&self) -> &str {
        &self.expr
    }
}

impl FromStr for CronExpr {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        let schedule = cron::Schedule::from_str(expr)
            .map_err(|e| SchedulerError::InvalidSchedule(format!("cron '{}': {}", expr, e)))?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }
}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.expr).finish()
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for CronExpr {}

impl Serialize for CronExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expr)
    }
}

impl<'de> Deserialize<'de> for CronExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expr = String::deserialize(deserializer)?;
        expr.parse().map_err(serde::de::Error::custom)
    }
}

mod every_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(every: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(every.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// When a recurring job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Schedule {
    /// Fixed period from the previous computation.
    Interval {
        #[serde(rename = "every_secs", with = "every_secs")]
        every: Duration,
    },
    /// Every day at `hour:minute`.
    Daily { hour: u32, minute: u32 },
    /// Every week on `weekday` at `hour:minute`.
    Weekly {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
    /// Every month on `day` at `hour:minute`. Months without that day fire
    /// on their last day instead.
    Monthly { day: u32, hour: u32, minute: u32 },
    /// Cron expression.
    Cron { expr: CronExpr },
}

impl Schedule {
    pub fn interval(every: Duration) -> Self {
        Schedule::Interval { every }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Schedule::Daily { hour, minute }
    }

    pub fn weekly(weekday: Weekday, hour: u32, minute: u32) -> Self {
        Schedule::Weekly {
            weekday,
            hour,
            minute,
        }
    }

    pub fn monthly(day: u32, hour: u32, minute: u32) -> Self {
        Schedule::Monthly { day, hour, minute }
    }

    /// Parse a cron expression.
    pub fn cron(expr: &str) -> Result<Self, SchedulerError> {
        Ok(Schedule::Cron { expr: expr.parse()? })
    }

    /// Build a schedule from its config-file form.
    pub fn from_spec(spec: &ScheduleSpec) -> Result<Self, SchedulerError> {
        let schedule = match spec {
            ScheduleSpec::Interval { every_secs } => Schedule::interval(Duration::from_secs(*every_secs)),
            ScheduleSpec::Daily { hour, minute } => Schedule::daily(*hour, *minute),
            ScheduleSpec::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let weekday = weekday.parse::<Weekday>().map_err(|_| {
                    SchedulerError::InvalidSchedule(format!("unknown weekday '{}'", weekday))
                })?;
                Schedule::weekly(weekday, *hour, *minute)
            }
            ScheduleSpec::Monthly { day, hour, minute } => Schedule::monthly(*day, *hour, *minute),
            ScheduleSpec::Cron { expr } => Schedule::cron(expr)?,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Reject schedules that can never produce a valid time.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Schedule::Interval { every } => {
                if every.is_zero() {
                    return Err(SchedulerError::InvalidSchedule(
                        "interval must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            Schedule::Daily { hour, minute } | Schedule::Weekly { hour, minute, .. } => {
                check_time(*hour, *minute)
            }
            Schedule::Monthly { day, hour, minute } => {
                if !(1..=31).contains(day) {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "day of month must be 1-31, got {}",
                        day
                    )));
                }
                check_time(*hour, *minute)
            }
            Schedule::Cron { .. } => Ok(()),
        }
    }

    /// First firing strictly after `now`.
    ///
    /// `None` only when a cron expression has no future occurrence or the
    /// result would overflow the calendar.
    pub fn next(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Interval { every } => {
                let every = chrono::Duration::from_std(*every).ok()?;
                now.checked_add_signed(every)
            }
            Schedule::Daily { hour, minute } => {
                let today = at(now.date_naive(), *hour, *minute)?;
                if today > now {
                    Some(today)
                } else {
                    at(now.date_naive().succ_opt()?, *hour, *minute)
                }
            }
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let ahead = (7 + weekday.num_days_from_monday() - now.weekday().num_days_from_monday()) % 7;
                let date = now.date_naive().checked_add_days(Days::new(u64::from(ahead)))?;
                let candidate = at(date, *hour, *minute)?;
                if candidate > now {
                    Some(candidate)
                } else {
                    at(date.checked_add_days(Days::new(7))?, *hour, *minute)
                }
            }
            Schedule::Monthly { day, hour, minute } => {
                let first = now.date_naive().with_day(1)?;
                let this_month = at(clamped_day(first, *day)?, *hour, *minute)?;
                if this_month > now {
                    Some(this_month)
                } else {
                    let next_first = first.checked_add_months(Months::new(1))?;
                    at(clamped_day(next_first, *day)?, *hour, *minute)
                }
            }
            Schedule::Cron { expr } => expr.schedule.after(&now).find(|t| *t > now),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval { every } => write!(f, "every {}s", every.as_secs()),
            Schedule::Daily { hour, minute } => write!(f, "daily at {:02}:{:02}", hour, minute),
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => write!(f, "weekly on {} at {:02}:{:02}", weekday, hour, minute),
            Schedule::Monthly { day, hour, minute } => {
                write!(f, "monthly on day {} at {:02}:{:02}", day, hour, minute)
            }
            Schedule::Cron { expr } => write!(f, "cron '{}'", expr.as_str()),
        }
    }
}

fn check_time(hour: u32, minute: u32) -> Result<(), SchedulerError> {
    if hour > 23 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "hour must be 0-23, got {}",
            hour
        )));
    }
    if minute > 59 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "minute must be 0-59, got {}",
            minute
        )));
    }
    Ok(())
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    Some(date.and_hms_opt(hour, minute, 0)?.and_utc())
}

/// `day` within the month starting at `first`, clamped to the month's last day.
fn clamped_day(first: NaiveDate, day: u32) -> Option<NaiveDate> {
    let last = first
        .checked_add_months(Months::new(1))?
        .pred_opt()?
        .day();
    first.with_day(day.clamp(1, last))
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
