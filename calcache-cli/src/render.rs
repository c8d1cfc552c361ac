//! Terminal and JSON views of timelines.

use calcache_core::event::Event;
use calcache_core::timeline::TimeSegment;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use owo_colors::OwoColorize;
use serde::Serialize;

/// Extension trait for TUI rendering with colors.
pub trait Render {
    fn render(&self, tz: Tz) -> String;
}

impl Render for TimeSegment {
    fn render(&self, tz: Tz) -> String {
        let range = format!(
            "{}-{}",
            self.start.with_timezone(&tz).format("%H:%M"),
            self.end().with_timezone(&tz).format("%H:%M")
        );
        let length = format!("({})", format_length(self));

        if self.is_idle() {
            return format!("{} {} {}", range.dimmed(), "idle".dimmed(), length.dimmed());
        }

        let titles: Vec<String> = self.active.iter().map(title).collect();
        format!("{} {} {}", range, titles.join(", ").green(), length.dimmed())
    }
}

fn title(event: &Event) -> String {
    event
        .summary
        .clone()
        .unwrap_or_else(|| format!("<{}>", event.uid))
}

fn format_length(segment: &TimeSegment) -> String {
    let seconds = segment.duration.num_seconds().max(0) as u64;
    humantime::format_duration(std::time::Duration::from_secs(seconds)).to_string()
}

/// Day heading such as "Today", "Tomorrow" or "Wed May 01".
pub fn day_label(instant: DateTime<Utc>, tz: Tz) -> String {
    let today = Utc::now().with_timezone(&tz).date_naive();
    let date = instant.with_timezone(&tz).date_naive();

    match (date - today).num_days() {
        0 => "Today".into(),
        1 => "Tomorrow".into(),
        -1 => "Yesterday".into(),
        _ => date.format("%a %b %d").to_string(),
    }
}

/// One segment as printed by `timeline --json`.
#[derive(Serialize)]
pub struct SegmentView<'a> {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_secs: i64,
    pub active: &'a [Event],
}

impl<'a> From<&'a TimeSegment> for SegmentView<'a> {
    fn from(segment: &'a TimeSegment) -> Self {
        SegmentView {
            start: segment.start,
            end: segment.end(),
            duration_secs: segment.duration.num_seconds(),
            active: &segment.active,
        }
    }
}
