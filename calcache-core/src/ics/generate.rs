//! ICS generation.

use std::collections::HashSet;

use chrono::TimeDelta;
use chrono_tz::Tz;
use icalendar::{Alarm, Calendar, Component, EventLike, Property, ValueType};

use crate::datetime::Datetime;
use crate::error::CalResult;
use crate::event::{Event, EventObject, Trigger, TriggerRelation};

const PRODID: &str = "-//calcache//calcache//EN";

/// Generate the .ics body for an object: the main VEVENT followed by its overrides.
pub fn generate_object(object: &EventObject) -> CalResult<String> {
    object.validate()?;

    let mut cal = Calendar::new();
    for event in object.events() {
        cal.push(build_event(event));
    }
    let cal = cal.done();

    Ok(strip_ics_bloat(&cal.to_string()))
}

fn build_event(event: &Event) -> icalendar::Event {
    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.uid);

    if let Some(ref summary) = event.summary {
        ics_event.summary(summary);
    }
    if let Some(ref location) = event.location {
        ics_event.location(location);
    }
    if let Some(ref description) = event.description {
        ics_event.description(description);
    }
    if !event.categories.is_empty() {
        ics_event.add_property("CATEGORIES", event.categories.join(","));
    }

    ics_event.append_property(datetime_property("DTSTART", &event.start));
    ics_event.append_property(datetime_property("DTEND", &event.end));

    if let Some(ref recurrence) = event.recurrence {
        if let Some(ref rule) = recurrence.rule {
            ics_event.add_property("RRULE", rule);
        }
        for rdate in &recurrence.additional {
            ics_event.append_multi_property(datetime_property("RDATE", rdate));
        }
        for exdate in &recurrence.exceptions {
            ics_event.append_multi_property(datetime_property("EXDATE", exdate));
        }
    }

    if let Some(ref instance) = event.recurrence_instance {
        ics_event.append_property(datetime_property("RECURRENCE-ID", instance));
    }

    if let Some(ref trigger) = event.trigger {
        ics_event.alarm(Alarm::display("Reminder", to_ics_trigger(trigger)));
    }

    // Repeated names go to the multi-property list so none of them is overwritten
    let mut seen = HashSet::new();
    for raw in &event.other {
        let mut prop = Property::new(&raw.name, &raw.value);
        for (key, value) in &raw.params {
            prop.add_parameter(key, value);
        }
        if seen.insert(raw.name.to_ascii_uppercase()) {
            ics_event.append_property(prop);
        } else {
            ics_event.append_multi_property(prop);
        }
    }

    ics_event.done()
}

fn datetime_property(name: &str, value: &Datetime) -> Property {
    let mut prop = Property::new(name, value.ics_value());
    if value.is_all_day() {
        prop.append_parameter(ValueType::Date);
    }
    if let Some(tzid) = value.tzid() {
        prop.add_parameter("TZID", tzid);
    }
    prop
}

fn to_ics_trigger(trigger: &Trigger) -> icalendar::Trigger {
    match trigger {
        Trigger::Relative {
            offset_secs,
            related,
        } => {
            let before = *offset_secs < 0;
            let magnitude = TimeDelta::seconds(offset_secs.abs());
            match (related, before) {
                (TriggerRelation::Start, true) => icalendar::Trigger::before_start(magnitude),
                (TriggerRelation::Start, false) => icalendar::Trigger::after_start(magnitude),
                (TriggerRelation::End, true) => icalendar::Trigger::before_end(magnitude),
                (TriggerRelation::End, false) => icalendar::Trigger::after_end(magnitude),
            }
        }
        // Absolute triggers must be UTC; a floating one is read as UTC
        Trigger::Absolute(at) => icalendar::Trigger::from(at.to_utc(Tz::UTC)),
    }
}

/// Clean up output from the icalendar crate:
/// - use our own PRODID
/// - drop CALSCALE:GREGORIAN (the default)
/// - drop the DTSTAMP/UID lines the crate adds inside VALARM
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());
    let mut in_valarm = false;

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:");
            result.push_str(PRODID);
            result.push_str("\r\n");
            continue;
        }
        if line == "CALSCALE:GREGORIAN" {
            continue;
        }

        match line {
            "BEGIN:VALARM" => in_valarm = true,
            "END:VALARM" => in_valarm = false,
            _ => {}
        }
        if in_valarm && (line.starts_with("DTSTAMP:") || line.starts_with("UID:")) {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::event::fixtures::{daily, event, override_of};
    use crate::event::{RawProperty, Recurrence};
    use crate::ics::parse_object;

    fn stamp(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn object_roundtrips_through_ics() {
        let mut main = daily("standup", "2024-01-01 09:00", "2024-01-01 09:30");
        main.start = Datetime::zoned(stamp("2024-01-01 09:00"), chrono_tz::Europe::Berlin);
        main.end = Datetime::zoned(stamp("2024-01-01 09:30"), chrono_tz::Europe::Berlin);
        main.recurrence = Some(Recurrence {
            rule: Some("FREQ=DAILY;COUNT=10".into()),
            additional: vec![Datetime::floating(stamp("2024-01-20 09:00"))],
            exceptions: vec![
                Datetime::zoned(stamp("2024-01-02 09:00"), chrono_tz::Europe::Berlin),
                Datetime::zoned(stamp("2024-01-04 09:00"), chrono_tz::Europe::Berlin),
            ],
        });
        main.categories = vec!["work".into(), "daily".into()];
        main.trigger = Some(Trigger::Relative {
            offset_secs: -900,
            related: TriggerRelation::Start,
        });
        main.other = vec![RawProperty {
            name: "X-COLOR".into(),
            params: vec![("LABEL".into(), "blue".into())],
            value: "#0000ff".into(),
        }];
        let moved = override_of(&main, "2024-01-03 08:00", "2024-01-03 10:00", "2024-01-03 10:30");

        let object = EventObject::new(main, vec![moved]).unwrap();
        let ics = generate_object(&object).unwrap();
        assert!(ics.contains("PRODID:-//calcache//calcache//EN"));

        let parsed = parse_object(None, &ics).unwrap();
        assert_eq!(parsed.main.start, object.main.start);
        assert_eq!(parsed.main.recurrence, object.main.recurrence);
        assert_eq!(parsed.main.categories, object.main.categories);
        assert_eq!(parsed.main.trigger, object.main.trigger);
        assert_eq!(parsed.main.find_other("X-COLOR"), object.main.find_other("X-COLOR"));
        assert_eq!(parsed.overrides, object.overrides);
    }

    #[test]
    fn all_day_events_are_written_as_dates() {
        let mut holiday = event("holiday", "2024-12-25 00:00", "2024-12-26 00:00");
        holiday.start = Datetime::date(NaiveDate::from_ymd_opt(2024, 12, 25).unwrap());
        holiday.end = Datetime::date(NaiveDate::from_ymd_opt(2024, 12, 26).unwrap());

        let ics = generate_object(&EventObject::new(holiday, Vec::new()).unwrap()).unwrap();
        assert!(ics.contains("DTSTART;VALUE=DATE:20241225"));

        let parsed = parse_object(None, &ics).unwrap();
        assert!(parsed.main.start.is_all_day());
        assert!(parsed.main.start.is_floating());
    }

    #[test]
    fn alarm_bloat_is_stripped() {
        let mut reminder = event("remind", "2024-01-01 09:00", "2024-01-01 10:00");
        reminder.trigger = Some(Trigger::Relative {
            offset_secs: 600,
            related: TriggerRelation::End,
        });

        let ics = generate_object(&EventObject::new(reminder, Vec::new()).unwrap()).unwrap();
        let alarm: Vec<&str> = ics
            .lines()
            .skip_while(|l| *l != "BEGIN:VALARM")
            .take_while(|l| *l != "END:VALARM")
            .collect();
        assert!(!alarm.is_empty());
        assert!(alarm.iter().all(|l| !l.starts_with("UID:") && !l.starts_with("DTSTAMP:")));

        let parsed = parse_object(None, &ics).unwrap();
        assert_eq!(parsed.main.trigger, Some(Trigger::Relative {
            offset_secs: 600,
            related: TriggerRelation::End,
        }));
    }
}
