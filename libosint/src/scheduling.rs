//! Schedule types and time parsing
//!
//! A task's schedule decides when it runs next. Recurring schedules are
//! always computed forward from the time a run happened, never from the
//! previous due time, so a task that was overdue by several periods runs once
//! and then resumes its normal cadence.
//!
//! Accepted schedule strings:
//! - `once`, `hourly`, `daily`, `weekly`
//! - `every 30m`, `every 2h` (also `every_30_minutes`, `every_2_hours`), at
//!   least one minute
//! - cron expressions, either bare (`0 9 * * 1-5`) or prefixed (`cron:0 9 * * *`).
//!   Five-field expressions fire at second zero.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{OsintError, Result};

/// Shortest interval accepted for `every` schedules
pub const MIN_EVERY_SECONDS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScheduleType {
    Once,
    Hourly,
    Daily,
    Weekly,
    Every(std::time::Duration),
    /// Normalized to six or seven fields (seconds first)
    Cron(String),
}

impl ScheduleType {
    /// Fixed period of interval schedules
    pub fn period(&self) -> Option<std::time::Duration> {
        match self {
            ScheduleType::Hourly => Some(std::time::Duration::from_secs(3600)),
            ScheduleType::Daily => Some(std::time::Duration::from_secs(24 * 3600)),
            ScheduleType::Weekly => Some(std::time::Duration::from_secs(7 * 24 * 3600)),
            ScheduleType::Every(period) => Some(*period),
            ScheduleType::Once | ScheduleType::Cron(_) => None,
        }
    }

    pub fn is_once(&self) -> bool {
        matches!(self, ScheduleType::Once)
    }

    /// Next run strictly after `from`; `None` when the schedule never fires again
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self {
            ScheduleType::Once => Ok(None),
            ScheduleType::Cron(expr) => Ok(cron_schedule(expr)?.after(&from).next()),
            periodic => {
                let period = periodic.period().unwrap_or_default();
                let step = Duration::from_std(period)
                    .map_err(|_| OsintError::InvalidInput("Schedule period out of range".to_string()))?;
                Ok(Some(from + step))
            }
        }
    }

    /// `next_run_at` for a newly added task
    ///
    /// An explicit start time wins; otherwise `once` is due immediately,
    /// interval schedules one period from now, and cron at its next fire time.
    pub fn first_run(
        &self,
        now: DateTime<Utc>,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        if let Some(start) = start_at {
            return Ok(Some(start));
        }
        match self {
            ScheduleType::Once => Ok(Some(now)),
            _ => self.next_after(now),
        }
    }
}

fn cron_schedule(expr: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(expr)
        .map_err(|e| OsintError::InvalidInput(format!("Invalid cron expression '{}': {}", expr, e)))
}

fn normalize_cron(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(OsintError::InvalidInput(format!(
                "Cron expression must have 5 to 7 fields, got {}",
                n
            )))
        }
    };
    cron_schedule(&normalized)?;
    Ok(normalized)
}

fn parse_every(spec: &str) -> Result<std::time::Duration> {
    let spec = spec.trim().trim_start_matches('_').trim();

    // every_30_minutes / every_2_hours
    let underscored: Vec<&str> = spec.split('_').collect();
    let period = if let [count, unit] = underscored.as_slice() {
        let count: u64 = count.parse().map_err(|_| {
            OsintError::InvalidInput(format!("Invalid interval count: '{}'", count))
        })?;
        let unit_secs = match *unit {
            "minute" | "minutes" => 60,
            "hour" | "hours" => 3600,
            "day" | "days" => 24 * 3600,
            other => {
                return Err(OsintError::InvalidInput(format!(
                    "Unknown interval unit: '{}'",
                    other
                )))
            }
        };
        std::time::Duration::from_secs(count.saturating_mul(unit_secs))
    } else {
        humantime::parse_duration(spec)
            .map_err(|e| OsintError::InvalidInput(format!("Invalid interval '{}': {}", spec, e)))?
    };

    if period.as_secs() < MIN_EVERY_SECONDS {
        return Err(OsintError::InvalidInput(format!(
            "Interval must be at least {} seconds",
            MIN_EVERY_SECONDS
        )));
    }
    Ok(period)
}

impl FromStr for ScheduleType {
    type Err = OsintError;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        if input.is_empty() {
            return Err(OsintError::InvalidInput(
                "Schedule cannot be empty".to_string(),
            ));
        }

        let lower = input.to_lowercase();
        match lower.as_str() {
            "once" => return Ok(ScheduleType::Once),
            "hourly" => return Ok(ScheduleType::Hourly),
            "daily" => return Ok(ScheduleType::Daily),
            "weekly" => return Ok(ScheduleType::Weekly),
            _ => {}
        }

        if let Some(rest) = lower.strip_prefix("every") {
            return Ok(ScheduleType::Every(parse_every(rest)?));
        }
        if let Some(expr) = input.strip_prefix("cron:") {
            return Ok(ScheduleType::Cron(normalize_cron(expr)?));
        }
        if input.split_whitespace().count() >= 5 {
            return Ok(ScheduleType::Cron(normalize_cron(input)?));
        }

        Err(OsintError::InvalidInput(format!(
            "Unknown schedule '{}'. Use once, hourly, daily, weekly, 'every <duration>' or a cron expression",
            input
        )))
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleType::Once => f.write_str("once"),
            ScheduleType::Hourly => f.write_str("hourly"),
            ScheduleType::Daily => f.write_str("daily"),
            ScheduleType::Weekly => f.write_str("weekly"),
            ScheduleType::Every(period) => write!(f, "every {}", humantime::format_duration(*period)),
            ScheduleType::Cron(expr) => write!(f, "cron:{}", expr),
        }
    }
}

impl TryFrom<String> for ScheduleType {
    type Error = OsintError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ScheduleType> for String {
    fn from(schedule: ScheduleType) -> Self {
        schedule.to_string()
    }
}

/// Parse a task start time
///
/// Supports:
/// - Relative durations: "30m", "2h", "1d"
/// - RFC 3339: "2025-11-20T15:00:00Z"
/// - Absolute UTC: "2025-11-20 15:00"
/// - Time of day, UTC, next occurrence: "09:30"
/// - Natural language: "tomorrow 9am", "next monday"
pub fn parse_start_time(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(OsintError::InvalidInput(
            "Start time cannot be empty".to_string(),
        ));
    }

    if let Ok(offset) = humantime::parse_duration(input) {
        let offset = Duration::from_std(offset)
            .map_err(|_| OsintError::InvalidInput("Duration out of range".to_string()))?;
        return Ok(now + offset);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(time) = NaiveTime::parse_from_str(input, "%H:%M") {
        let today = Utc.from_utc_datetime(&now.date_naive().and_time(time));
        return Ok(if today > now {
            today
        } else {
            today + Duration::days(1)
        });
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us)
        .map_err(|e| OsintError::InvalidInput(format!("Could not parse start time '{}': {}", input, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_named_schedules() {
        assert_eq!("once".parse::<ScheduleType>().unwrap(), ScheduleType::Once);
        assert_eq!("Daily".parse::<ScheduleType>().unwrap(), ScheduleType::Daily);
        assert_eq!("HOURLY".parse::<ScheduleType>().unwrap(), ScheduleType::Hourly);
        assert_eq!("weekly".parse::<ScheduleType>().unwrap(), ScheduleType::Weekly);
    }

    #[test]
    fn test_parse_every_forms() {
        let expected = ScheduleType::Every(std::time::Duration::from_secs(30 * 60));
        assert_eq!("every 30m".parse::<ScheduleType>().unwrap(), expected);
        assert_eq!("every_30_minutes".parse::<ScheduleType>().unwrap(), expected);
        assert_eq!(
            "every_2_hours".parse::<ScheduleType>().unwrap(),
            ScheduleType::Every(std::time::Duration::from_secs(7200))
        );
    }

    #[test]
    fn test_every_rejects_sub_minute() {
        let err = "every 30s".parse::<ScheduleType>().unwrap_err();
        assert!(err.to_string().contains("at least 60 seconds"));
        assert!("every_0_minutes".parse::<ScheduleType>().is_err());
        assert!("every_5_fortnights".parse::<ScheduleType>().is_err());
    }

    #[test]
    fn test_parse_cron() {
        let schedule: ScheduleType = "0 9 * * *".parse().unwrap();
        assert_eq!(schedule, ScheduleType::Cron("0 0 9 * * *".to_string()));

        let prefixed: ScheduleType = "cron:0 9 * * *".parse().unwrap();
        assert_eq!(prefixed, schedule);

        assert!("cron:not a cron at all".parse::<ScheduleType>().is_err());
        assert!("fortnightly".parse::<ScheduleType>().is_err());
        assert!("".parse::<ScheduleType>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for input in ["once", "hourly", "daily", "weekly", "every 45m", "cron:0 0 9 * * *"] {
            let schedule: ScheduleType = input.parse().unwrap();
            assert_eq!(schedule.to_string().parse::<ScheduleType>().unwrap(), schedule);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&ScheduleType::Daily).unwrap();
        assert_eq!(json, "\"daily\"");
        let parsed: ScheduleType = serde_json::from_str("\"every 2h\"").unwrap();
        assert_eq!(parsed.period(), Some(std::time::Duration::from_secs(7200)));
        assert!(serde_json::from_str::<ScheduleType>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_daily_next_is_24h_later() {
        let ran_at = at("2025-03-01T10:15:00Z");
        let next = ScheduleType::Daily.next_after(ran_at).unwrap().unwrap();
        assert_eq!(next - ran_at, Duration::hours(24));
    }

    #[test]
    fn test_once_never_repeats() {
        let now = at("2025-03-01T10:15:00Z");
        assert_eq!(ScheduleType::Once.next_after(now).unwrap(), None);
        assert_eq!(ScheduleType::Once.first_run(now, None).unwrap(), Some(now));
    }

    #[test]
    fn test_cron_next_fire() {
        let schedule: ScheduleType = "0 9 * * *".parse().unwrap();
        let next = schedule
            .next_after(at("2025-03-01T10:00:00Z"))
            .unwrap()
            .unwrap();
        assert_eq!(next, at("2025-03-02T09:00:00Z"));
    }

    #[test]
    fn test_first_run_defaults() {
        let now = at("2025-03-01T10:00:00Z");
        assert_eq!(
            ScheduleType::Hourly.first_run(now, None).unwrap(),
            Some(at("2025-03-01T11:00:00Z"))
        );

        let start = at("2025-03-05T00:00:00Z");
        assert_eq!(
            ScheduleType::Weekly.first_run(now, Some(start)).unwrap(),
            Some(start)
        );
    }

    #[test]
    fn test_parse_start_time_relative() {
        let now = at("2025-03-01T10:00:00Z");
        assert_eq!(parse_start_time("30m", now).unwrap(), at("2025-03-01T10:30:00Z"));
        assert_eq!(parse_start_time("1d", now).unwrap(), at("2025-03-02T10:00:00Z"));
    }

    #[test]
    fn test_parse_start_time_absolute() {
        let now = at("2025-03-01T10:00:00Z");
        assert_eq!(
            parse_start_time("2025-04-01T08:00:00+02:00", now).unwrap(),
            at("2025-04-01T06:00:00Z")
        );
        assert_eq!(
            parse_start_time("2025-04-01 08:00", now).unwrap(),
            at("2025-04-01T08:00:00Z")
        );
    }

    #[test]
    fn test_parse_start_time_of_day_is_next_occurrence() {
        let now = at("2025-03-01T10:00:00Z");
        assert_eq!(parse_start_time("11:30", now).unwrap(), at("2025-03-01T11:30:00Z"));
        assert_eq!(parse_start_time("09:00", now).unwrap(), at("2025-03-02T09:00:00Z"));
    }

    #[test]
    fn test_parse_start_time_natural_language() {
        let now = at("2025-03-01T10:00:00Z");
        let tomorrow = parse_start_time("tomorrow", now).unwrap();
        assert!(tomorrow > now);
        assert!(tomorrow - now <= Duration::hours(48));
    }

    #[test]
    fn test_parse_start_time_rejects_garbage() {
        let now = Utc::now();
        assert!(parse_start_time("", now).is_err());
        assert!(parse_start_time("whenever you like", now).is_err());
    }
}
