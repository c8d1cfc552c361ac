//! Activity timelines.
//!
//! Sweeps a list of occurrences into consecutive segments covering a window
//! exactly, each segment listing the occurrences active for all of it.

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;

use crate::event::Event;
use crate::recurrence::Window;

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSegment {
    pub start: DateTime<Utc>,
    pub duration: TimeDelta,
    pub active: Vec<Event>,
}

impl TimeSegment {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }
}

struct Span {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    event: Event,
}

struct Cut {
    start: DateTime<Utc>,
    duration: TimeDelta,
    active: Vec<usize>,
}

/// Build the timeline for `window`.
///
/// Every occurrence must end no earlier than it starts and must not start
/// before the window; callers that break this get a panic. Floating and
/// all-day values are read in `local`.
pub fn build_timeline(occurrences: Vec<Event>, window: &Window, local: Tz) -> Vec<TimeSegment> {
    let mut spans: Vec<Span> = occurrences
        .into_iter()
        .map(|event| Span {
            start: event.start.to_utc(local),
            end: event.end.to_utc(local),
            event,
        })
        .collect();

    for span in &spans {
        assert!(
            span.end >= span.start,
            "occurrence '{}' ends at {} before its start {}",
            span.event.uid,
            span.end,
            span.start
        );
        assert!(
            span.start >= window.start(),
            "occurrence '{}' starts at {} before the window start {}",
            span.event.uid,
            span.start,
            window.start()
        );
    }

    // stable: equal starts keep input order
    spans.sort_by_key(|span| span.start);

    let cuts = sweep(&spans, window);
    check_cuts(&cuts, &spans, window);

    cuts.into_iter()
        .map(|cut| TimeSegment {
            start: cut.start,
            duration: cut.duration,
            active: cut.active.iter().map(|&i| spans[i].event.clone()).collect(),
        })
        .collect()
}

fn sweep(spans: &[Span], window: &Window) -> Vec<Cut> {
    let mut cuts = Vec::new();
    let mut t = window.start();
    // next span not yet admitted
    let mut cursor = 0;
    let mut active: Vec<usize> = Vec::new();

    while t < window.end() {
        active.retain(|&i| spans[i].end > t);
        while cursor < spans.len() && spans[cursor].start <= t {
            active.push(cursor);
            cursor += 1;
        }

        let remaining = window.end() - t;
        let nearest_end = active.iter().map(|&i| spans[i].end - t).min();
        let nearest_start = spans.get(cursor).map(|span| span.start - t);
        let step = nearest_end
            .into_iter()
            .chain(nearest_start)
            .min()
            .filter(|step| *step <= remaining)
            .unwrap_or(remaining);

        cuts.push(Cut {
            start: t,
            duration: step,
            active: active.clone(),
        });
        t += step;
    }

    cuts
}

fn check_cuts(cuts: &[Cut], spans: &[Span], window: &Window) {
    let mut total = TimeDelta::zero();

    for (i, cut) in cuts.iter().enumerate() {
        let end = cut.start + cut.duration;
        assert!(
            end <= window.end(),
            "segment {i} ends at {end}, past the window end {}",
            window.end()
        );

        for &index in &cut.active {
            let span = &spans[index];
            assert!(
                span.start <= cut.start && span.end >= end,
                "occurrence '{}' ({} - {}) does not cover segment {i} ({} - {end})",
                span.event.uid,
                span.start,
                span.end,
                cut.start
            );
        }

        if i > 0 {
            let prev = &cuts[i - 1];
            assert_eq!(
                prev.start + prev.duration,
                cut.start,
                "segment {i} does not continue segment {}",
                i - 1
            );
            assert!(
                !(prev.active.is_empty() && cut.active.is_empty()),
                "segments {} and {i} are both idle",
                i - 1
            );
        }

        total += cut.duration;
    }

    assert_eq!(
        total,
        window.duration(),
        "segment durations do not add up to the window"
    );
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::datetime::Datetime;
    use crate::event::fixtures::event;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
            .unwrap()
            .and_utc()
    }

    fn window(start: &str, end: &str) -> Window {
        Window::new(utc(start), utc(end)).unwrap()
    }

    fn assert_well_formed(segments: &[TimeSegment], window: &Window) {
        let total: TimeDelta = segments.iter().map(|s| s.duration).sum();
        assert_eq!(total, window.duration());

        for pair in segments.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start);
            assert!(!(pair[0].is_idle() && pair[1].is_idle()));
        }
        for segment in segments {
            for occurrence in &segment.active {
                assert!(occurrence.start.to_utc(Tz::UTC) <= segment.start);
                assert!(occurrence.end.to_utc(Tz::UTC) >= segment.end());
            }
        }
        if let Some(first) = segments.first() {
            assert_eq!(first.start, window.start());
        }
    }

    #[test]
    fn single_event_splits_day_in_three() {
        let day = window("2024-01-01 00:00", "2024-01-02 00:00");
        let meeting = event("meeting", "2024-01-01 10:00", "2024-01-01 11:00");

        let segments = build_timeline(vec![meeting.clone()], &day, Tz::UTC);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start, utc("2024-01-01 00:00"));
        assert_eq!(segments[0].duration, TimeDelta::hours(10));
        assert!(segments[0].is_idle());
        assert_eq!(segments[1].start, utc("2024-01-01 10:00"));
        assert_eq!(segments[1].duration, TimeDelta::hours(1));
        assert_eq!(segments[1].active, vec![meeting]);
        assert_eq!(segments[2].start, utc("2024-01-01 11:00"));
        assert_eq!(segments[2].duration, TimeDelta::hours(13));
        assert!(segments[2].is_idle());
    }

    #[test]
    fn overlapping_events_share_segments() {
        let day = window("2024-01-01 08:00", "2024-01-01 12:00");
        let a = event("a", "2024-01-01 08:00", "2024-01-01 10:00");
        let b = event("b", "2024-01-01 09:00", "2024-01-01 11:00");

        let segments = build_timeline(vec![b.clone(), a.clone()], &day, Tz::UTC);
        assert_well_formed(&segments, &day);

        let actives: Vec<Vec<&str>> = segments
            .iter()
            .map(|s| s.active.iter().map(|e| e.uid.as_str()).collect())
            .collect();
        assert_eq!(actives, vec![vec!["a"], vec!["a", "b"], vec!["b"], vec![]]);
    }

    #[test]
    fn event_running_past_window_is_clamped() {
        let day = window("2024-01-01 00:00", "2024-01-01 12:00");
        let long = event("long", "2024-01-01 06:00", "2024-01-02 06:00");

        let segments = build_timeline(vec![long], &day, Tz::UTC);
        assert_well_formed(&segments, &day);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].end(), day.end());
    }

    #[test]
    fn no_occurrences_is_one_idle_segment() {
        let day = window("2024-01-01 00:00", "2024-01-02 00:00");
        let segments = build_timeline(Vec::new(), &day, Tz::UTC);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_idle());
        assert_eq!(segments[0].duration, TimeDelta::days(1));
    }

    #[test]
    fn empty_window_has_no_segments() {
        let instant = window("2024-01-01 00:00", "2024-01-01 00:00");
        let at = event("at", "2024-01-01 00:00", "2024-01-01 01:00");
        assert!(build_timeline(vec![at], &instant, Tz::UTC).is_empty());
    }

    #[test]
    fn zero_length_event_separates_idle_time() {
        let day = window("2024-01-01 00:00", "2024-01-01 04:00");
        let ping = event("ping", "2024-01-01 02:00", "2024-01-01 02:00");

        let segments = build_timeline(vec![ping], &day, Tz::UTC);
        assert_well_formed(&segments, &day);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].duration, TimeDelta::zero());
    }

    #[test]
    fn floating_events_use_local_zone() {
        let stamp = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap();
        let day = window("2024-01-01 00:00", "2024-01-02 00:00");
        let mut lunch = event("lunch", "2024-01-01 00:00", "2024-01-01 00:00");
        lunch.start = Datetime::floating(stamp("2024-01-01 12:00"));
        lunch.end = Datetime::floating(stamp("2024-01-01 13:00"));

        let segments = build_timeline(vec![lunch], &day, chrono_tz::Asia::Tokyo);
        assert_eq!(segments[1].start, utc("2024-01-01 03:00"));
    }

    #[test]
    #[should_panic(expected = "before the window start")]
    fn occurrence_before_window_is_a_contract_violation() {
        let day = window("2024-01-01 00:00", "2024-01-02 00:00");
        let early = event("early", "2023-12-31 23:00", "2024-01-01 01:00");
        build_timeline(vec![early], &day, Tz::UTC);
    }

    #[test]
    #[should_panic(expected = "before its start")]
    fn inverted_occurrence_is_a_contract_violation() {
        let day = window("2024-01-01 00:00", "2024-01-02 00:00");
        let inverted = event("inverted", "2024-01-01 05:00", "2024-01-01 04:00");
        build_timeline(vec![inverted], &day, Tz::UTC);
    }

    #[test]
    fn random_occurrence_sets_keep_invariants() {
        let base = utc("2024-01-01 00:00");

        for seed in 0..300u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let length = TimeDelta::seconds(rng.gen_range(0..200_000));
            let window = Window::new(base, base + length).unwrap();

            let count = rng.gen_range(0..40);
            let occurrences: Vec<Event> = (0..count)
                .map(|i| {
                    let start = base + TimeDelta::seconds(rng.gen_range(0..250_000));
                    let end = start + TimeDelta::seconds(rng.gen_range(0..30_000));
                    Event {
                        start: Datetime::utc(start),
                        end: Datetime::utc(end),
                        ..event(&format!("e{i}"), "2024-01-01 00:00", "2024-01-01 00:00")
                    }
                })
                .collect();

            let segments = build_timeline(occurrences, &window, Tz::UTC);
            assert_well_formed(&segments, &window);
        }
    }
}
