//! Occurrence expansion.
//!
//! Turns an [`EventObject`] into the concrete occurrences that start inside
//! a [`Window`]: RRULE and RDATE instances minus EXDATEs, with every
//! override replacing the instance it was cut from.

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::datetime::Datetime;
use crate::error::{CalError, CalResult};
use crate::event::{Event, EventObject};

/// Rule used for events without an RRULE: exactly one instance at DTSTART.
const SINGLE_OCCURRENCE: &str = "FREQ=DAILY;COUNT=1";

/// Most occurrences one object may produce inside a single window.
pub const MAX_OCCURRENCES: u16 = u16::MAX;

/// A half-open query range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CalResult<Self> {
        if end < start {
            return Err(CalError::InvalidWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Window { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Expand every object and concatenate the occurrences.
pub fn expand_all<'a>(
    objects: impl IntoIterator<Item = &'a EventObject>,
    window: &Window,
    local: Tz,
) -> CalResult<Vec<Event>> {
    let mut out = Vec::new();
    for object in objects {
        out.extend(expand_occurrences(object, window, local)?);
    }
    Ok(out)
}

/// Occurrences of one object starting inside `window`.
///
/// Floating and all-day values are read in `local`. A series generating
/// [`MAX_OCCURRENCES`] or more instances inside the window is rejected
/// rather than truncated.
pub fn expand_occurrences(
    object: &EventObject,
    window: &Window,
    local: Tz,
) -> CalResult<Vec<Event>> {
    let main = &object.main;
    let rule_set = build_rule_set(object, local)?;

    // Ask the generator for a slightly wider range and cut it down ourselves,
    // so the window bounds do not depend on the crate's inclusivity rules.
    let lower = window.start() - TimeDelta::seconds(1);
    let upper = window.end() + TimeDelta::seconds(1);
    let tz: rrule::Tz = Utc.into();

    let result = rule_set
        .after(lower.with_timezone(&tz))
        .before(upper.with_timezone(&tz))
        .all(MAX_OCCURRENCES);
    if result.limited {
        return Err(CalError::InvalidEvent(format!(
            "recurrence of '{}' yields more than {MAX_OCCURRENCES} occurrences in the window",
            main.uid
        )));
    }

    let mut occurrences = Vec::new();
    for occurrence in &result.dates {
        let instant = occurrence.with_timezone(&Utc);
        if instant < lower || instant > upper {
            panic!(
                "recurrence generator for '{}' produced {instant} outside of [{lower}, {upper}]",
                main.uid
            );
        }
        if !window.contains(instant) {
            continue;
        }
        occurrences.push(occurrence_of(main, instant, local));
    }

    for event in &object.overrides {
        let replaces = event
            .recurrence_instance
            .as_ref()
            .is_some_and(|instance| window.contains(instance.to_utc(local)));
        if replaces || window.contains(event.start.to_utc(local)) {
            occurrences.push(event.clone());
        }
    }

    Ok(occurrences)
}

/// The main event re-anchored at one generated start.
fn occurrence_of(main: &Event, instant: DateTime<Utc>, local: Tz) -> Event {
    let start = main.start.with_instant(instant, local);
    let end = shifted_end(main, &start, local);

    if main.recurrence.is_none() {
        return Event {
            start,
            end,
            ..main.clone()
        };
    }

    Event {
        start,
        end,
        recurrence: None,
        recurrence_instance: Some(start),
        ..main.clone()
    }
}

/// Keep wall-clock length when start and end share a form (so a 09:00-09:30
/// meeting stays 09:00-09:30 across DST), otherwise keep the absolute length.
fn shifted_end(main: &Event, start: &Datetime, local: Tz) -> Datetime {
    let same_form = main.start.zone() == main.end.zone()
        && main.start.is_all_day() == main.end.is_all_day();

    if same_form {
        let length = main.end.stamp() - main.start.stamp();
        main.end.with_stamp(start.stamp() + length)
    } else {
        let length = main.end.to_utc(local) - main.start.to_utc(local);
        main.end.with_instant(start.to_utc(local) + length, local)
    }
}

fn build_rule_set(object: &EventObject, local: Tz) -> CalResult<RRuleSet> {
    let main = &object.main;
    let anchor = main.start.anchor_zone(local);

    let mut lines = vec![rule_line("DTSTART", &main.start, anchor, local)];
    let rule = match main.rule() {
        Some(rule) => rule_with_utc_until(rule, anchor).map_err(|e| {
            CalError::InvalidEvent(format!("invalid recurrence for '{}': {e}", main.uid))
        })?,
        None => SINGLE_OCCURRENCE.to_string(),
    };
    lines.push(format!("RRULE:{rule}"));

    if let Some(ref recurrence) = main.recurrence {
        for rdate in &recurrence.additional {
            lines.push(rule_line("RDATE", rdate, anchor, local));
        }
        for exdate in &recurrence.exceptions {
            lines.push(rule_line("EXDATE", exdate, anchor, local));
        }
    }

    // Overrides are emitted on their own; suppress the instances they replace
    for instance in object.overrides.iter().filter_map(|e| e.recurrence_instance.as_ref()) {
        lines.push(rule_line("EXDATE", instance, anchor, local));
    }

    lines.join("\n").parse::<RRuleSet>().map_err(|e| {
        CalError::InvalidEvent(format!("invalid recurrence for '{}': {e}", main.uid))
    })
}

/// The rule with its UNTIL pinned to a UTC instant, the only form the generator
/// accepts next to a zoned DTSTART. DATE and floating values are read in
/// `anchor`; a DATE bound includes its whole day.
fn rule_with_utc_until(rule: &str, anchor: Tz) -> CalResult<String> {
    let parts = rule
        .split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.trim().eq_ignore_ascii_case("UNTIL") => {
                let until = Datetime::parse_ics(value, None, false)?;
                let instant = if until.is_all_day() {
                    let next_day = until.with_stamp(until.stamp() + TimeDelta::days(1));
                    next_day.to_utc(anchor) - TimeDelta::seconds(1)
                } else {
                    until.to_utc(anchor)
                };
                Ok(format!("{key}={}", instant.format("%Y%m%dT%H%M%SZ")))
            }
            _ => Ok(part.to_string()),
        })
        .collect::<CalResult<Vec<_>>>()?;
    Ok(parts.join(";"))
}

/// One DTSTART/RDATE/EXDATE line expressed in the series' anchor zone.
fn rule_line(name: &str, value: &Datetime, anchor: Tz, local: Tz) -> String {
    let instant = value.to_utc(local);
    if anchor == Tz::UTC {
        return format!("{name}:{}", instant.format("%Y%m%dT%H%M%SZ"));
    }
    let wall = instant.with_timezone(&anchor).naive_local();
    format!(
        "{name};TZID={}:{}",
        anchor.name(),
        wall.format("%Y%m%dT%H%M%S")
    )
}
