//! Parsing of `--start` / `--end` values.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Accepts RFC 3339 (`2025-03-20T15:00:00+01:00`), a date (midnight in `tz`),
/// `now`, or `now` plus or minus a humantime duration (`now-2h`, `now+1week`).
pub fn parse_instant(value: &str, now: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Some(offset) = value.strip_prefix("now") {
        if offset.is_empty() {
            return Ok(now);
        }
        let mut chars = offset.chars();
        let sign = chars.next();
        let delta = humantime::parse_duration(chars.as_str().trim())
            .with_context(|| format!("Invalid duration in '{value}'"))?;
        let delta = chrono::TimeDelta::from_std(delta)
            .with_context(|| format!("Duration too large in '{value}'"))?;
        return match sign {
            Some('+') => Ok(now + delta),
            Some('-') => Ok(now - delta),
            _ => bail!("Expected 'now+<duration>' or 'now-<duration>', got '{value}'"),
        };
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).context("Invalid date")?;
        return match tz.from_local_datetime(&midnight) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt.with_timezone(&Utc)),
            LocalResult::None => bail!("{value} has no midnight in {tz}"),
        };
    }

    bail!("Could not parse '{value}' as a time (try RFC 3339, YYYY-MM-DD or now-2h)")
}
