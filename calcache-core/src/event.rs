//! Event data model.
//!
//! An [`EventObject`] is one calendar resource on the server: a main event
//! (the recurrence root, or a plain one-off event) plus any overrides that
//! replace single occurrences of it.

use serde::{Deserialize, Serialize};

use crate::datetime::Datetime;
use crate::error::{CalError, CalResult};

/// One VEVENT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    pub start: Datetime,
    pub end: Datetime,

    /// RRULE, RDATE and EXDATE of a recurrence root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    /// RECURRENCE-ID: set only on overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_instance: Option<Datetime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,

    /// Properties calcache does not interpret, kept for round-tripping.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other: Vec<RawProperty>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recurrence {
    /// RRULE value, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// RDATE: occurrences added on top of the rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<Datetime>,
    /// EXDATE: occurrences removed from the rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<Datetime>,
}

impl Recurrence {
    pub fn is_empty(&self) -> bool {
        self.rule.is_none() && self.additional.is_empty() && self.exceptions.is_empty()
    }
}

/// Alarm trigger: either an offset from the start/end or a fixed time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Relative {
        /// Signed offset in seconds; negative fires before.
        offset_secs: i64,
        #[serde(default)]
        related: TriggerRelation,
    },
    Absolute(Datetime),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRelation {
    #[default]
    Start,
    End,
}

/// A property preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProperty {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl Event {
    pub fn is_override(&self) -> bool {
        self.recurrence_instance.is_some()
    }

    pub fn rule(&self) -> Option<&str> {
        self.recurrence.as_ref().and_then(|r| r.rule.as_deref())
    }

    pub fn validate(&self) -> CalResult<()> {
        if self.uid.trim().is_empty() {
            return Err(CalError::InvalidEvent("event has no UID".into()));
        }
        if self.is_override() && self.rule().is_some() {
            return Err(CalError::InvalidEvent(format!(
                "override of '{}' carries its own RRULE",
                self.uid
            )));
        }
        Ok(())
    }

    /// Replace an uninterpreted property, or append it.
    pub fn set_other(&mut self, name: &str, value: String) {
        self.other.retain(|p| !p.name.eq_ignore_ascii_case(name));
        self.other.push(RawProperty {
            name: name.to_string(),
            params: Vec::new(),
            value,
        });
    }

    pub fn find_other(&self, name: &str) -> Option<&RawProperty> {
        self.other.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// One addressable calendar resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventObject {
    /// Server path; empty until the object has been created remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub main: Event,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Event>,
}

impl EventObject {
    pub fn new(main: Event, overrides: Vec<Event>) -> CalResult<Self> {
        let object = EventObject {
            path: None,
            main,
            overrides,
        };
        object.validate()?;
        Ok(object)
    }

    /// Build an object from every VEVENT of one resource, split into the
    /// main event and overrides by RECURRENCE-ID.
    pub fn from_components(path: Option<String>, events: Vec<Event>) -> CalResult<Self> {
        let mut main = None;
        let mut overrides = Vec::new();

        for event in events {
            if event.is_override() {
                overrides.push(event);
            } else if main.is_some() {
                return Err(CalError::InvalidEvent(format!(
                    "more than one main VEVENT for uid '{}'",
                    event.uid
                )));
            } else {
                main = Some(event);
            }
        }

        let main = main.ok_or_else(|| {
            CalError::InvalidEvent(format!(
                "no main VEVENT in {}",
                path.as_deref().unwrap_or("object")
            ))
        })?;

        let object = EventObject {
            path,
            main,
            overrides,
        };
        object.validate()?;
        Ok(object)
    }

    pub fn uid(&self) -> &str {
        &self.main.uid
    }

    pub fn validate(&self) -> CalResult<()> {
        self.main.validate()?;
        if self.main.is_override() {
            return Err(CalError::InvalidEvent(format!(
                "main event '{}' has a RECURRENCE-ID",
                self.main.uid
            )));
        }
        for event in &self.overrides {
            event.validate()?;
            if !event.is_override() {
                return Err(CalError::InvalidEvent(format!(
                    "override of '{}' has no RECURRENCE-ID",
                    self.main.uid
                )));
            }
            if event.uid != self.main.uid {
                return Err(CalError::InvalidEvent(format!(
                    "override uid '{}' does not match main uid '{}'",
                    event.uid, self.main.uid
                )));
            }
        }
        Ok(())
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        std::iter::once(&self.main).chain(self.overrides.iter())
    }

    pub fn events_mut(&mut self) -> impl Iterator<Item = &mut Event> {
        std::iter::once(&mut self.main).chain(self.overrides.iter_mut())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::NaiveDateTime;

    use super::*;

    pub fn at(s: &str) -> Datetime {
        Datetime::utc(
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
                .unwrap()
                .and_utc(),
        )
    }

    pub fn event(uid: &str, start: &str, end: &str) -> Event {
        Event {
            uid: uid.to_string(),
            summary: Some(format!("{uid} summary")),
            location: None,
            description: None,
            categories: Vec::new(),
            start: at(start),
            end: at(end),
            recurrence: None,
            recurrence_instance: None,
            trigger: None,
            other: Vec::new(),
        }
    }

    pub fn daily(uid: &str, start: &str, end: &str) -> Event {
        Event {
            recurrence: Some(Recurrence {
                rule: Some("FREQ=DAILY".into()),
                ..Recurrence::default()
            }),
            ..event(uid, start, end)
        }
    }

    pub fn override_of(main: &Event, instance: &str, start: &str, end: &str) -> Event {
        Event {
            recurrence: None,
            recurrence_instance: Some(at(instance)),
            ..event(&main.uid, start, end)
        }
    }
}
