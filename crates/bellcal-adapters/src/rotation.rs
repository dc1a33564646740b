//! Rotation-day labels ("Day 3 - Blue") from the schedule feed.

use bellcal_core::{CalendarEvent, RotationDay};

const MARKER: &str = "Day";
const MAX_DIGITS: usize = 2;

/// The rotation number in `title`: the (at most two) characters right after
/// the first `Day`, with non-digits removed. Zero and empty are rejected.
pub fn rotation_day_number(title: &str) -> Option<u32> {
    let idx = title.find(MARKER)?;
    let digits: String = title[idx + MARKER.len()..]
        .chars()
        .take(MAX_DIGITS)
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse::<u32>().ok().filter(|n| *n > 0)
}

/// One entry per event whose title carries a rotation label, dated by the
/// event's start. No dedup: callers replace the previous table wholesale.
pub fn derive_rotation_days(events: &[CalendarEvent]) -> Vec<RotationDay> {
    events
        .iter()
        .filter_map(|event| {
            rotation_day_number(&event.title).map(|day_number| RotationDay {
                day_number,
                date: event.start_time,
            })
        })
        .collect()
}
