//! Scheduling and time parsing utilities
//!
//! Turns the `--at` argument of `cadence-queue schedule` into a Unix timestamp.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};

use crate::{CadenceError, Result};

/// Furthest ahead a post may be scheduled
const MAX_SCHEDULE_AHEAD_DAYS: i64 = 365;

/// Parse a schedule string relative to `now`
///
/// Supports multiple formats:
/// - `now`
/// - Relative durations: "1h", "30m", "2d 4h", "in 45m", "+10m"
/// - RFC 3339 timestamps: "2026-11-20T15:00:00Z"
/// - Plain UTC date-times: "2026-11-20 15:00"
/// - Natural language: "tomorrow 9am", "next monday 10:00"
///
/// # Errors
///
/// Returns `InvalidInput` if nothing matches, or if the result is in the past
/// or more than a year ahead.
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CadenceError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    let at = if input.eq_ignore_ascii_case("now") {
        now
    } else if let Some(duration) = parse_duration(input) {
        now + duration
    } else if let Some(at) = parse_absolute(input) {
        at
    } else {
        chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(
            |e| CadenceError::InvalidInput(format!("Could not parse schedule '{}': {}", input, e)),
        )?
    };

    if at < now {
        return Err(CadenceError::InvalidInput(format!(
            "Schedule time {} is in the past",
            at.to_rfc3339()
        )));
    }

    if at > now + Duration::days(MAX_SCHEDULE_AHEAD_DAYS) {
        return Err(CadenceError::InvalidInput(format!(
            "Cannot schedule more than {} days ahead",
            MAX_SCHEDULE_AHEAD_DAYS
        )));
    }

    Ok(at)
}

/// Duration forms: "30m", "in 30m", "+30m"
fn parse_duration(input: &str) -> Option<Duration> {
    let trimmed = input
        .strip_prefix("in ")
        .or_else(|| input.strip_prefix('+'))
        .unwrap_or(input)
        .trim();

    let std_duration = humantime::parse_duration(trimmed).ok()?;
    Duration::from_std(std_duration).ok()
}

fn parse_absolute(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Human-readable distance between `now` and `at`, e.g. "in 2h 30m" or "5m ago"
pub fn format_relative(at: i64, now: i64) -> String {
    let delta = at - now;
    let elapsed = std::time::Duration::from_secs(delta.unsigned_abs());
    let label = humantime::format_duration(elapsed).to_string();
    if delta >= 0 {
        format!("in {}", label)
    } else {
        format!("{} ago", label)
    }
}
