//! ICS parsing using the icalendar crate's parser.

use chrono::TimeDelta;
use icalendar::parser::{Component, Property, read_calendar, unfold};

use crate::datetime::Datetime;
use crate::error::{CalError, CalResult};
use crate::event::{Event, EventObject, RawProperty, Recurrence, Trigger, TriggerRelation};

/// Properties mapped onto [`Event`] fields; everything else lands in `Event::other`.
const INTERPRETED: &[&str] = &[
    "UID",
    "SUMMARY",
    "LOCATION",
    "DESCRIPTION",
    "CATEGORIES",
    "DTSTART",
    "DTEND",
    "DURATION",
    "RRULE",
    "RDATE",
    "EXDATE",
    "RECURRENCE-ID",
    "TRIGGER",
];

/// Parse one calendar resource into an [`EventObject`].
pub fn parse_object(path: Option<String>, content: &str) -> CalResult<EventObject> {
    let label = path.clone().unwrap_or_else(|| "object".into());
    parse_resource(path, content)?
        .ok_or_else(|| CalError::InvalidEvent(format!("no main VEVENT in {label}")))
}

/// Like [`parse_object`], but a resource without a main VEVENT is `None`:
/// a VTODO or VJOURNAL sharing the collection, or a lone override of a
/// series the user was never invited to.
pub fn parse_resource(path: Option<String>, content: &str) -> CalResult<Option<EventObject>> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(|e| CalError::IcsParse(e.to_string()))?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    let events = vevents
        .into_iter()
        .map(parse_event)
        .collect::<CalResult<Vec<_>>>()?;

    if events.iter().all(Event::is_override) {
        return Ok(None);
    }
    EventObject::from_components(path, events).map(Some)
}

/// VEVENTs may sit at the top level or inside a VCALENDAR depending on how
/// the parser frames the input.
fn collect_vevents<'a>(components: &'a [Component<'a>], out: &mut Vec<&'a Component<'a>>) {
    for component in components {
        if component.name.as_ref().eq_ignore_ascii_case("VEVENT") {
            out.push(component);
        } else {
            collect_vevents(&component.components, out);
        }
    }
}

fn parse_event(vevent: &Component<'_>) -> CalResult<Event> {
    let uid = vevent
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .filter(|uid| !uid.trim().is_empty())
        .ok_or_else(|| CalError::InvalidEvent("VEVENT without UID".into()))?;

    let start = vevent
        .find_prop("DTSTART")
        .ok_or_else(|| CalError::InvalidEvent(format!("event '{uid}' has no DTSTART")))
        .and_then(parse_datetime)?;

    let end = match (vevent.find_prop("DTEND"), vevent.find_prop("DURATION")) {
        (Some(dtend), _) => parse_datetime(dtend)?,
        (None, Some(duration)) => {
            let delta = parse_signed_duration(duration.val.as_ref())?;
            start.with_stamp(start.stamp() + delta)
        }
        // RFC 5545: a date-only start lasts one day, a date-time start is instantaneous
        (None, None) if start.is_all_day() => start.with_stamp(start.stamp() + TimeDelta::days(1)),
        (None, None) => start,
    };

    let text = |name: &str| vevent.find_prop(name).map(|p| p.val.to_string());

    let categories = props_named(vevent, "CATEGORIES")
        .flat_map(|p| p.val.as_ref().split(',').map(str::to_string).collect::<Vec<_>>())
        .filter(|c| !c.is_empty())
        .collect();

    let rule = text("RRULE");
    let additional = datetime_lists(vevent, "RDATE")?;
    let exceptions = datetime_lists(vevent, "EXDATE")?;
    let recurrence = Recurrence {
        rule,
        additional,
        exceptions,
    };
    let recurrence = (!recurrence.is_empty()).then_some(recurrence);

    let recurrence_instance = vevent
        .find_prop("RECURRENCE-ID")
        .map(parse_datetime)
        .transpose()?;

    let alarm_trigger = vevent
        .components
        .iter()
        .filter(|c| c.name.as_ref().eq_ignore_ascii_case("VALARM"))
        .find_map(|alarm| alarm.find_prop("TRIGGER"));
    let trigger = alarm_trigger
        .or_else(|| vevent.find_prop("TRIGGER"))
        .map(parse_trigger)
        .transpose()?;

    let other = vevent
        .properties
        .iter()
        .filter(|p| {
            let name = p.name.as_ref();
            !INTERPRETED.iter().any(|known| known.eq_ignore_ascii_case(name))
        })
        .map(|p| RawProperty {
            name: p.name.to_string(),
            params: p
                .params
                .iter()
                .map(|param| {
                    (
                        param.key.to_string(),
                        param.val.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                    )
                })
                .collect(),
            value: p.val.to_string(),
        })
        .collect();

    Ok(Event {
        uid,
        summary: text("SUMMARY"),
        location: text("LOCATION"),
        description: text("DESCRIPTION"),
        categories,
        start,
        end,
        recurrence,
        recurrence_instance,
        trigger,
        other,
    })
}

fn props_named<'a>(
    component: &'a Component<'a>,
    name: &'a str,
) -> impl Iterator<Item = &'a Property<'a>> + 'a {
    component
        .properties
        .iter()
        .filter(move |p| p.name.as_ref().eq_ignore_ascii_case(name))
}

fn param<'a>(prop: &'a Property<'_>, key: &str) -> Option<&'a str> {
    prop.params
        .iter()
        .find(|p| p.key.as_ref().eq_ignore_ascii_case(key))
        .and_then(|p| p.val.as_ref())
        .map(|v| v.as_ref())
}

fn is_date_valued(prop: &Property<'_>) -> bool {
    param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
}

fn parse_datetime(prop: &Property<'_>) -> CalResult<Datetime> {
    Datetime::parse_ics(prop.val.as_ref(), param(prop, "TZID"), is_date_valued(prop))
}

/// RDATE/EXDATE: repeatable, each value may be a comma-separated list
/// sharing one TZID.
fn datetime_lists(component: &Component<'_>, name: &str) -> CalResult<Vec<Datetime>> {
    let mut out = Vec::new();
    for prop in props_named(component, name) {
        if param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("PERIOD")) {
            tracing::warn!(property = name, "skipping PERIOD-valued date list");
            continue;
        }
        let tzid = param(prop, "TZID");
        let is_date = is_date_valued(prop);
        for value in prop.val.as_ref().split(',').filter(|v| !v.trim().is_empty()) {
            out.push(Datetime::parse_ics(value, tzid, is_date)?);
        }
    }
    Ok(out)
}

fn parse_trigger(prop: &Property<'_>) -> CalResult<Trigger> {
    let value = prop.val.as_ref();

    if param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME")) {
        return Ok(Trigger::Absolute(Datetime::parse_ics(value, None, false)?));
    }

    let related = match param(prop, "RELATED") {
        Some(r) if r.eq_ignore_ascii_case("END") => TriggerRelation::End,
        _ => TriggerRelation::Start,
    };
    let offset = parse_signed_duration(value)?;

    Ok(Trigger::Relative {
        offset_secs: offset.num_seconds(),
        related,
    })
}

/// Parse an iCalendar duration such as `-PT15M` or `P1W`.
fn parse_signed_duration(value: &str) -> CalResult<TimeDelta> {
    let value = value.trim();
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.trim_start_matches('+')),
    };

    let duration = iso8601::duration(unsigned)
        .map_err(|e| CalError::IcsParse(format!("invalid duration '{value}': {e}")))?;
    let std_duration: std::time::Duration = duration.into();
    let delta = TimeDelta::from_std(std_duration)
        .map_err(|e| CalError::IcsParse(format!("duration '{value}' out of range: {e}")))?;

    Ok(if negative { -delta } else { delta })
}
