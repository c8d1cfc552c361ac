use anyhow::Result;
use calcache_core::event::{Event, EventObject};
use calcache_core::recurrence::{Window, expand_all};
use calcache_core::timeline::{TimeSegment, build_timeline};
use chrono::Utc;
use chrono_tz::Tz;
use owo_colors::OwoColorize;
use tracing::warn;

use super::{load_objects, print_json};
use crate::app::App;
use crate::render::{Render, SegmentView, day_label};
use crate::utils::time::parse_instant;

pub async fn run(
    app: &App,
    calendar: &str,
    start: &str,
    end: &str,
    no_sync: bool,
    json: bool,
) -> Result<()> {
    let now = Utc::now();
    let window = Window::new(
        parse_instant(start, now, app.local_tz)?,
        parse_instant(end, now, app.local_tz)?,
    )?;

    let objects = load_objects(app, calendar, no_sync).await?;
    let segments = timeline_for(&objects, &window, app.local_tz)?;

    if json {
        let views: Vec<SegmentView> = segments.iter().map(SegmentView::from).collect();
        return print_json(&views);
    }

    if segments.iter().all(TimeSegment::is_idle) {
        println!("{}", "No events in this window".dimmed());
    }

    let mut current_day: Option<String> = None;
    for segment in &segments {
        let label = day_label(segment.start, app.local_tz);
        if current_day.as_ref() != Some(&label) {
            if current_day.is_some() {
                println!();
            }
            println!("{}", label.bold());
            current_day = Some(label);
        }
        println!("  {}", segment.render(app.local_tz));
    }

    Ok(())
}

/// Expand `objects` over `window` and sweep the occurrences into segments.
///
/// Overrides moved to before the window and events ending before they start
/// cannot be placed on the timeline; they are left out.
fn timeline_for(objects: &[EventObject], window: &Window, tz: Tz) -> Result<Vec<TimeSegment>> {
    let occurrences: Vec<Event> = expand_all(objects, window, tz)?
        .into_iter()
        .filter(|event| {
            let (start, end) = (event.start.to_utc(tz), event.end.to_utc(tz));
            if end < start {
                warn!(uid = %event.uid, "event ends before it starts, left out of the timeline");
                return false;
            }
            start >= window.start()
        })
        .collect();

    Ok(build_timeline(occurrences, window, tz))
}
