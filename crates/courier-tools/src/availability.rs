use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde_json::Value;

use courier_types::{DayWindow, TimeInterval};

pub const FREE_LABEL: &str = "free";
const UNTITLED_EVENT: &str = "(No title)";
const SLOT_TIME_FORMAT: &str = "%I:%M %p";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Availability {
    /// Merged, non-overlapping busy blocks in ascending order.
    pub busy: Vec<TimeInterval>,
    pub free: Vec<TimeInterval>,
}

/// Restricts events to `window`. Events that start before the window are
/// pulled up to its start, and events that end after it are cut at its end.
/// Events entirely outside the window are dropped. Input order is kept.
pub fn clip_to_window(events: &[TimeInterval], window: &DayWindow) -> Vec<TimeInterval> {
    events
        .iter()
        .filter(|ev| ev.end > window.start() && ev.start < window.end())
        .map(|ev| TimeInterval {
            start: ev.start.max(window.start()),
            end: ev.end.min(window.end()),
            label: ev.label.clone(),
        })
        .collect()
}

/// Sweeps the events once with a cursor starting at the window start and
/// returns the merged busy blocks and the free gaps between them. Busy and
/// free together tile the window exactly.
pub fn free_slots(events: &[TimeInterval], window: &DayWindow) -> Availability {
    let mut sorted = clip_to_window(events, window);
    sorted.sort_by_key(|ev| ev.start);

    let mut out = Availability::default();
    let mut cursor = window.start();
    let mut block: Option<TimeInterval> = None;

    for ev in sorted {
        let ev_end = ev.end;
        if ev.start > cursor {
            out.free
                .push(TimeInterval::new(cursor, ev.start, FREE_LABEL));
            out.busy.extend(block.take());
        }
        match block.as_mut() {
            Some(current) => {
                current.end = current.end.max(ev.end);
                if !ev.label.is_empty() {
                    if !current.label.is_empty() {
                        current.label.push_str(", ");
                    }
                    current.label.push_str(&ev.label);
                }
            }
            None => block = Some(ev),
        }
        cursor = cursor.max(ev_end);
    }
    out.busy.extend(block);

    if cursor < window.end() {
        out.free
            .push(TimeInterval::new(cursor, window.end(), FREE_LABEL));
    }
    out
}

/// Converts one raw calendar event into an interval. Timed events carry
/// `dateTime`; all-day events carry `date` and start at midnight in the
/// window's offset.
pub fn interval_from_event(event: &Value, offset: FixedOffset) -> anyhow::Result<TimeInterval> {
    let start = event_bound(event, "start", offset)?;
    let end = event_bound(event, "end", offset)?;
    if start > end {
        anyhow::bail!("event ends before it starts");
    }
    let label = event
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or(UNTITLED_EVENT);
    Ok(TimeInterval::new(start, end, label))
}

fn event_bound(
    event: &Value,
    key: &str,
    offset: FixedOffset,
) -> anyhow::Result<DateTime<FixedOffset>> {
    let bound = event.get(key);
    if let Some(raw) = bound.and_then(|b| b.get("dateTime")).and_then(|v| v.as_str()) {
        return DateTime::parse_from_rfc3339(raw)
            .map_err(|err| anyhow::anyhow!("malformed event {key} `{raw}`: {err}"));
    }
    if let Some(raw) = bound.and_then(|b| b.get("date")).and_then(|v| v.as_str()) {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|err| anyhow::anyhow!("malformed event {key} `{raw}`: {err}"))?;
        return date
            .and_time(NaiveTime::MIN)
            .and_local_timezone(offset)
            .single()
            .ok_or_else(|| anyhow::anyhow!("ambiguous event {key} `{raw}`"));
    }
    anyhow::bail!("event has no {key} time")
}

fn slot_range(interval: &TimeInterval, offset: FixedOffset) -> String {
    format!(
        "{} - {}",
        interval.start.with_timezone(&offset).format(SLOT_TIME_FORMAT),
        interval.end.with_timezone(&offset).format(SLOT_TIME_FORMAT)
    )
}

/// Human-readable day schedule: each event in start order, then the free
/// slots. Times are rendered in the window's offset.
pub fn format_schedule(
    date: NaiveDate,
    events: &[TimeInterval],
    availability: &Availability,
    window: &DayWindow,
) -> String {
    let offset = window.offset();
    let mut ordered = clip_to_window(events, window);
    ordered.sort_by_key(|ev| ev.start);

    let mut text = format!("Schedule for {}:\n\n", date.format("%A, %B %d, %Y"));
    text.push_str("Scheduled Events:\n");
    if ordered.is_empty() {
        text.push_str("No scheduled events\n");
    } else {
        let lines = ordered
            .iter()
            .map(|ev| format!("{}: {}", slot_range(ev, offset), ev.label))
            .collect::<Vec<_>>();
        text.push_str(&lines.join("\n"));
    }

    text.push_str("\n\nAvailable Time Slots:\n");
    if availability.free.is_empty() {
        text.push_str("No free time available");
    } else {
        let lines = availability
            .free
            .iter()
            .map(|slot| slot_range(slot, offset))
            .collect::<Vec<_>>();
        text.push_str(&lines.join("\n"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Offset, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    fn window() -> DayWindow {
        let date = NaiveDate::from_ymd_opt(2025, 5, 19).expect("date");
        DayWindow::for_date(date, Utc.fix())
    }

    fn at(window: &DayWindow, minutes: i64) -> DateTime<FixedOffset> {
        window.start() + Duration::minutes(minutes)
    }

    fn ev(window: &DayWindow, from: i64, to: i64, label: &str) -> TimeInterval {
        TimeInterval::new(at(window, from), at(window, to), label)
    }

    #[test]
    fn overlapping_events_merge_into_one_busy_block() {
        let w = window();
        let events = vec![ev(&w, 9 * 60, 10 * 60, "A"), ev(&w, 9 * 60 + 30, 9 * 60 + 45, "B")];
        let out = free_slots(&events, &w);
        assert_eq!(out.busy.len(), 1);
        assert_eq!(out.busy[0].start, at(&w, 9 * 60));
        assert_eq!(out.busy[0].end, at(&w, 10 * 60));
        assert_eq!(out.busy[0].label, "A, B");
        assert_eq!(out.free.len(), 2);
        assert_eq!((out.free[0].start, out.free[0].end), (w.start(), at(&w, 9 * 60)));
        assert_eq!((out.free[1].start, out.free[1].end), (at(&w, 10 * 60), w.end()));
    }

    #[test]
    fn empty_day_is_one_free_slot() {
        let w = window();
        let out = free_slots(&[], &w);
        assert!(out.busy.is_empty());
        assert_eq!(out.free.len(), 1);
        assert_eq!((out.free[0].start, out.free[0].end), (w.start(), w.end()));
    }

    #[test]
    fn event_ending_at_day_end_leaves_no_trailing_slot() {
        let w = window();
        let out = free_slots(&[ev(&w, 20 * 60, 24 * 60, "late")], &w);
        assert_eq!(out.free.len(), 1);
        assert_eq!(out.free[0].end, at(&w, 20 * 60));
    }

    #[test]
    fn events_starting_before_the_window_are_clipped_not_dropped() {
        let w = window();
        let out = free_slots(&[ev(&w, -120, 60, "overnight"), ev(&w, -300, -60, "gone")], &w);
        assert_eq!(out.busy.len(), 1);
        assert_eq!(out.busy[0].start, w.start());
        assert_eq!(out.busy[0].label, "overnight");
        assert_eq!(out.free[0].start, at(&w, 60));
    }

    #[test]
    fn adjacent_events_are_merged_without_a_gap() {
        let w = window();
        let out = free_slots(&[ev(&w, 60, 120, "a"), ev(&w, 120, 180, "b")], &w);
        assert_eq!(out.busy.len(), 1);
        assert_eq!(out.free.len(), 2);
    }

    #[test]
    fn all_day_event_uses_window_offset_midnight() {
        let offset = FixedOffset::east_opt(2 * 3600).expect("offset");
        let interval = interval_from_event(
            &json!({"summary": "Holiday", "start": {"date": "2025-05-19"}, "end": {"date": "2025-05-20"}}),
            offset,
        )
        .expect("interval");
        assert_eq!(interval.start.to_rfc3339(), "2025-05-19T00:00:00+02:00");
        assert_eq!(interval.duration(), Duration::hours(24));

        let untitled = interval_from_event(
            &json!({"start": {"dateTime": "2025-05-19T09:00:00Z"}, "end": {"dateTime": "2025-05-19T10:00:00Z"}}),
            offset,
        )
        .expect("interval");
        assert_eq!(untitled.label, "(No title)");
        assert!(interval_from_event(&json!({"start": {}}), offset).is_err());
    }

    #[test]
    fn schedule_text_lists_events_then_free_slots() {
        let w = window();
        let date = NaiveDate::from_ymd_opt(2025, 5, 19).expect("date");
        let events = vec![ev(&w, 9 * 60, 10 * 60, "Standup")];
        let out = free_slots(&events, &w);
        let text = format_schedule(date, &events, &out, &w);
        assert!(text.starts_with("Schedule for Monday, May 19, 2025:\n\nScheduled Events:\n"));
        assert!(text.contains("09:00 AM - 10:00 AM: Standup"));
        assert!(text.contains("Available Time Slots:\n12:00 AM - 09:00 AM\n10:00 AM - 12:00 AM"));
    }

    fn arb_events() -> impl Strategy<Value = Vec<(i64, i64)>> {
        prop::collection::vec((0i64..1440, 0i64..240), 0..12)
            .prop_map(|raw| raw.into_iter().map(|(s, len)| (s, (s + len).min(1440))).collect())
    }

    proptest! {
        #[test]
        fn busy_and_free_partition_the_window(raw in arb_events()) {
            let w = window();
            let events = raw
                .iter()
                .enumerate()
                .map(|(i, (s, e))| ev(&w, *s, *e, &format!("e{i}")))
                .collect::<Vec<_>>();
            let out = free_slots(&events, &w);

            let mut all = out.busy.iter().chain(out.free.iter()).collect::<Vec<_>>();
            all.sort_by_key(|iv| (iv.start, iv.end));
            let mut cursor = w.start();
            for iv in all {
                prop_assert_eq!(iv.start, cursor);
                cursor = iv.end;
            }
            prop_assert_eq!(cursor, w.end());
            for pair in out.busy.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }
        }

        #[test]
        fn result_does_not_depend_on_input_order(raw in arb_events(), seed in any::<u64>()) {
            let w = window();
            let events = raw
                .iter()
                .map(|(s, e)| ev(&w, *s, *e, "x"))
                .collect::<Vec<_>>();
            let mut shuffled = events.clone();
            let len = shuffled.len();
            if len > 1 {
                let mut state = seed;
                for i in (1..len).rev() {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    shuffled.swap(i, (state >> 33) as usize % (i + 1));
                }
            }
            let a = free_slots(&events, &w);
            let b = free_slots(&shuffled, &w);
            prop_assert_eq!(&a.free, &b.free);
            let spans = |av: &Availability| av.busy.iter().map(|iv| (iv.start, iv.end)).collect::<Vec<_>>();
            prop_assert_eq!(spans(&a), spans(&b));
        }
    }
}
