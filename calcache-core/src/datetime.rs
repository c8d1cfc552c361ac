//! Calendar timestamps.
//!
//! A [`Datetime`] keeps the wall-clock value exactly as it was written in the
//! calendar object plus the information needed to pin it to an instant:
//!
//! - all-day values (`VALUE=DATE`) only carry a date, the time is midnight
//! - floating values have no zone and are read in the consumer's zone
//! - UTC values (`Z` suffix)
//! - zoned values (`TZID=...`)

use std::fmt;

use chrono::{
    DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;
use icalendar::parser::{Parameter, Property};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use serde::{Deserialize, Serialize};

use crate::error::{CalError, CalResult};

const DATE_FORMAT: &str = "%Y%m%d";
const DATETIME_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Floating,
    Utc,
    Named(Tz),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datetime {
    stamp: NaiveDateTime,
    zone: Zone,
    #[serde(default)]
    all_day: bool,
}

impl Datetime {
    /// An all-day value read in the consumer's zone.
    pub fn date(date: NaiveDate) -> Self {
        Datetime {
            stamp: date.and_time(NaiveTime::MIN),
            zone: Zone::Floating,
            all_day: true,
        }
    }

    /// An all-day value pinned to a named zone (`DTSTART;VALUE=DATE;TZID=...`).
    pub fn date_in(date: NaiveDate, tz: Tz) -> Self {
        Datetime {
            stamp: date.and_time(NaiveTime::MIN),
            zone: Zone::Named(tz),
            all_day: true,
        }
    }

    pub fn floating(stamp: NaiveDateTime) -> Self {
        Datetime {
            stamp,
            zone: Zone::Floating,
            all_day: false,
        }
    }

    pub fn utc(instant: DateTime<Utc>) -> Self {
        Datetime {
            stamp: instant.naive_utc(),
            zone: Zone::Utc,
            all_day: false,
        }
    }

    pub fn zoned(stamp: NaiveDateTime, tz: Tz) -> Self {
        Datetime {
            stamp,
            zone: Zone::Named(tz),
            all_day: false,
        }
    }

    pub fn stamp(&self) -> NaiveDateTime {
        self.stamp
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn is_all_day(&self) -> bool {
        self.all_day
    }

    pub fn is_floating(&self) -> bool {
        self.zone == Zone::Floating
    }

    /// The zone used to pin this value to an instant.
    pub fn anchor_zone(&self, local: Tz) -> Tz {
        match self.zone {
            Zone::Floating => local,
            Zone::Utc => Tz::UTC,
            Zone::Named(tz) => tz,
        }
    }

    /// Resolve to an absolute instant. Floating and all-day values without
    /// a zone are read in `local`.
    pub fn to_utc(&self, local: Tz) -> DateTime<Utc> {
        match self.zone {
            Zone::Utc => self.stamp.and_utc(),
            Zone::Floating => resolve_local(local, self.stamp),
            Zone::Named(tz) => resolve_local(tz, self.stamp),
        }
    }

    /// A value with the same form (all-day, zone) holding a new wall-clock stamp.
    pub fn with_stamp(&self, stamp: NaiveDateTime) -> Self {
        let stamp = if self.all_day {
            stamp.date().and_time(NaiveTime::MIN)
        } else {
            stamp
        };
        Datetime { stamp, ..*self }
    }

    /// Express an instant in the same form as `self`.
    pub fn with_instant(&self, instant: DateTime<Utc>, local: Tz) -> Self {
        let stamp = match self.zone {
            Zone::Utc => instant.naive_utc(),
            Zone::Floating => instant.with_timezone(&local).naive_local(),
            Zone::Named(tz) => instant.with_timezone(&tz).naive_local(),
        };
        self.with_stamp(stamp)
    }

    /// Parse an iCalendar value given its `TZID` and `VALUE` parameters.
    pub fn parse_ics(value: &str, tzid: Option<&str>, is_date: bool) -> CalResult<Self> {
        let value = value.trim();
        let mut prop = Property::new_ref("VALUE", value);
        if let Some(tzid) = tzid {
            prop.params.push(Parameter::new_ref("TZID", Some(tzid)));
        }
        let parsed = DatePerhapsTime::try_from(&prop)
            .map_err(|e| CalError::IcsParse(format!("invalid date-time '{value}': {e}")))?;
        let tz = tzid.map(parse_tzid).transpose()?;

        match parsed {
            DatePerhapsTime::Date(date) => Ok(match tz {
                Some(tz) => Datetime::date_in(date, tz),
                None => Datetime::date(date),
            }),
            DatePerhapsTime::DateTime(_) if is_date => {
                Err(CalError::IcsParse(format!("invalid date '{value}'")))
            }
            DatePerhapsTime::DateTime(CalendarDateTime::Utc(instant)) => Ok(Datetime::utc(instant)),
            DatePerhapsTime::DateTime(CalendarDateTime::Floating(stamp)) => {
                Ok(Datetime::floating(stamp))
            }
            DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
                Ok(Datetime::zoned(date_time, parse_tzid(&tzid)?))
            }
        }
    }

    /// The iCalendar value text, without parameters.
    pub fn ics_value(&self) -> String {
        if self.all_day {
            return self.stamp.format(DATE_FORMAT).to_string();
        }
        match self.zone {
            Zone::Utc => format!("{}Z", self.stamp.format(DATETIME_FORMAT)),
            Zone::Floating | Zone::Named(_) => self.stamp.format(DATETIME_FORMAT).to_string(),
        }
    }

    /// The `TZID` parameter this value needs, if any.
    pub fn tzid(&self) -> Option<&'static str> {
        match self.zone {
            Zone::Named(tz) => Some(tz.name()),
            Zone::Floating | Zone::Utc => None,
        }
    }
}

impl fmt::Display for Datetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_day {
            write!(f, "{}", self.stamp.format("%Y-%m-%d"))?;
        } else {
            write!(f, "{}", self.stamp.format("%Y-%m-%d %H:%M:%S"))?;
        }
        match self.zone {
            Zone::Floating => Ok(()),
            Zone::Utc => write!(f, " UTC"),
            Zone::Named(tz) => write!(f, " {}", tz.name()),
        }
    }
}

pub fn parse_tzid(tzid: &str) -> CalResult<Tz> {
    // Some servers quote the parameter or prefix it with a solidus (RFC 5545 3.2.19)
    let name = tzid.trim_matches('"').trim_start_matches('/');
    name.parse::<Tz>()
        .map_err(|_| CalError::IcsParse(format!("unknown TZID '{tzid}'")))
}

/// Pin a wall-clock stamp in `tz` to an instant. Ambiguous stamps take the
/// earlier instant; stamps inside a DST gap use the offset in force before it.
fn resolve_local(tz: Tz, stamp: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&stamp) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let before = tz.offset_from_utc_datetime(&(stamp - TimeDelta::days(1)));
            let offset = TimeDelta::seconds(i64::from(before.fix().local_minus_utc()));
            (stamp - offset).and_utc()
        }
    }
}

/// The consumer's zone: an explicit IANA name, or the system zone, or UTC.
pub fn resolve_timezone(configured: Option<&str>) -> Tz {
    if let Some(name) = configured {
        match name.parse::<Tz>() {
            Ok(tz) => return tz,
            Err(_) => tracing::warn!(timezone = name, "unknown configured timezone, using system zone"),
        }
    }

    match iana_time_zone::get_timezone() {
        Ok(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = %name, "system timezone not in tz database, using UTC");
            Tz::UTC
        }),
        Err(e) => {
            tracing::warn!(error = %e, "could not detect system timezone, using UTC");
            Tz::UTC
        }
    }
}
