//! Cron schedules for recurring jobs.
//!
//! A schedule is a pure function from an instant to the next occurrence after
//! it. Parsing is delegated to the `cron` crate; this module only normalizes
//! the accepted forms:
//!
//! - 5-field cron: `minute hour day month weekday`
//! - 6-field cron with seconds
//! - shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
//! - fixed intervals: `@every 5m`, `@every 1h30m`

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when parsing or evaluating schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The expression has no occurrence after the requested instant.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

#[derive(Debug, Clone)]
enum Recurrence {
    Cron(Box<CronSchedule>),
    Every(chrono::Duration),
}

/// Serialized form of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScheduleSpec {
    expression: String,
    timezone: String,
}

/// A parsed schedule evaluated in a fixed time zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ScheduleSpec", into = "ScheduleSpec")]
pub struct Schedule {
    expression: String,
    timezone: Tz,
    recurrence: Recurrence,
}

impl Schedule {
    /// Parse an expression evaluated in UTC.
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Parse an expression evaluated in the given IANA time zone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl AsRef<str>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone: Tz = timezone
            .as_ref()
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.as_ref().to_string()))?;
        let recurrence = parse_recurrence(expression.trim())?;

        Ok(Self {
            expression,
            timezone,
            recurrence,
        })
    }

    /// Next occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.recurrence {
            Recurrence::Cron(cron) => cron
                .after(&after.with_timezone(&self.timezone))
                .next()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or(ScheduleError::NoMoreOccurrences),
            Recurrence::Every(step) => after
                .checked_add_signed(*step)
                .ok_or(ScheduleError::NoMoreOccurrences),
        }
    }

    /// The original expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Name of the time zone the expression is evaluated in.
    pub fn timezone(&self) -> &str {
        self.timezone.name()
    }
}

impl TryFrom<ScheduleSpec> for Schedule {
    type Error = ScheduleError;

    fn try_from(spec: ScheduleSpec) -> Result<Self, Self::Error> {
        Schedule::with_timezone(spec.expression, spec.timezone)
    }
}

impl From<Schedule> for ScheduleSpec {
    fn from(schedule: Schedule) -> Self {
        ScheduleSpec {
            timezone: schedule.timezone().to_string(),
            expression: schedule.expression,
        }
    }
}

fn parse_recurrence(expression: &str) -> Result<Recurrence, ScheduleError> {
    let Some(shortcut) = expression.strip_prefix('@') else {
        return parse_cron(expression);
    };

    match shortcut.to_ascii_lowercase().as_str() {
        "yearly" | "annually" => parse_cron("0 0 1 1 *"),
        "monthly" => parse_cron("0 0 1 * *"),
        "weekly" => parse_cron("0 0 * * SUN"),
        "daily" | "midnight" => parse_cron("0 0 * * *"),
        "hourly" => parse_cron("0 * * * *"),
        s => match s.strip_prefix("every ") {
            Some(interval) => {
                let step = parse_interval(interval.trim())?;
                chrono::Duration::from_std(step)
                    .map(Recurrence::Every)
                    .map_err(|_| ScheduleError::InvalidInterval(interval.to_string()))
            }
            None => Err(ScheduleError::InvalidCron(format!(
                "unknown shortcut: {}",
                expression
            ))),
        },
    }
}

fn parse_cron(expression: &str) -> Result<Recurrence, ScheduleError> {
    let field_count = expression.split_whitespace().count();
    let normalized = match field_count {
        5 => format!("0 {}", expression),
        6 => expression.to_string(),
        n => {
            return Err(ScheduleError::InvalidCron(format!(
                "expected 5 or 6 fields, got {}",
                n
            )));
        }
    };

    CronSchedule::from_str(&normalized)
        .map(|cron| Recurrence::Cron(Box::new(cron)))
        .map_err(|e| ScheduleError::InvalidCron(e.to_string()))
}

/// Parse "30s", "5m", "1h30m", "2d".
fn parse_interval(s: &str) -> Result<Duration, ScheduleError> {
    let invalid = || ScheduleError::InvalidInterval(s.to_string());
    let mut total: u64 = 0;
    let mut digits = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            _ => return Err(invalid()),
        };
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
    }

    if !digits.is_empty() || total == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}
