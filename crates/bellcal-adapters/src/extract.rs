//! Walking `BEGIN:VEVENT` / `END:VEVENT` blocks into [`CalendarEvent`]s.

use bellcal_core::{CalendarEvent, Category};
use chrono_tz::Tz;
use tracing::debug;

use crate::dates::{parse_feed_date, zone_from_tzid};
use crate::fields::{decode_text, split_field, DateField, FieldMap};

const BEGIN_EVENT: &str = "BEGIN:VEVENT";
const END_EVENT: &str = "END:VEVENT";

/// Why a block produced no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    MissingSummary,
    MissingStart,
    UnparseableStart(String),
}

/// Emit one event per well-formed VEVENT block in `lines`. Malformed blocks
/// are skipped. Components nested inside an event (VALARM and friends) are
/// ignored so their properties cannot shadow the event's own.
pub fn extract_events(lines: &[String], category: Category, zone: Tz) -> Vec<CalendarEvent> {
    let mut events = Vec::new();
    let mut fields = FieldMap::default();
    let mut in_event = false;
    let mut nested = 0usize;

    for line in lines {
        let line = line.trim_end();
        if line == BEGIN_EVENT {
            if in_event {
                debug!(%category, "VEVENT opened before previous one closed; discarding partial block");
            }
            in_event = true;
            nested = 0;
            fields.clear();
            continue;
        }
        if !in_event {
            continue;
        }
        if line.starts_with("BEGIN:") {
            nested += 1;
            continue;
        }
        if line == END_EVENT && nested == 0 {
            in_event = false;
            match build_event(&fields, category, zone) {
                Ok(event) => events.push(event),
                Err(reason) => debug!(%category, ?reason, fields = fields.len(), "dropping VEVENT block"),
            }
            continue;
        }
        if line.starts_with("END:") {
            nested = nested.saturating_sub(1);
            continue;
        }
        if nested > 0 {
            continue;
        }
        if let Some(field) = split_field(line) {
            fields.insert(field);
        }
    }

    events
}

fn build_event(fields: &FieldMap, category: Category, zone: Tz) -> Result<CalendarEvent, DropReason> {
    let title = fields
        .text("SUMMARY")
        .map(|raw| decode_text(raw).trim().to_string())
        .filter(|title| !title.is_empty())
        .ok_or(DropReason::MissingSummary)?;

    let start_field = fields.date("DTSTART").ok_or(DropReason::MissingStart)?;
    let start_time = resolve(&start_field, zone)
        .ok_or_else(|| DropReason::UnparseableStart(start_field.raw.clone()))?;

    let end_field = fields.date("DTEND");
    let end_time = end_field.as_ref().and_then(|field| resolve(field, zone));

    let description = fields
        .text("DESCRIPTION")
        .map(|raw| decode_text(raw).trim().to_string())
        .filter(|text| !text.is_empty());

    Ok(CalendarEvent {
        title,
        start_time,
        end_time,
        category,
        description,
        raw_start: start_field.raw,
        raw_end: end_field.map(|field| field.raw),
    })
}

fn resolve(field: &DateField, default_zone: Tz) -> Option<chrono::DateTime<chrono::Utc>> {
    let zone = field
        .tzid
        .as_deref()
        .and_then(zone_from_tzid)
        .unwrap_or(default_zone);
    parse_feed_date(&field.raw, field.hint, zone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unfold::{HeuristicUnfolder, LineUnfolder};
    use chrono::{TimeZone, Utc};
    use chrono_tz::America::New_York;

    fn extract(text: &str) -> Vec<CalendarEvent> {
        extract_events(&HeuristicUnfolder.unfold(text), Category::Events, New_York)
    }

    const FEED: &str = "BEGIN:VCALENDAR\r
VERSION:2.0\r
BEGIN:VEVENT\r
DTSTART;VALUE=DATE:20250819\r
DTEND;VALUE=DATE:20250820\r
SUMMARY:First Day of School\r
END:VEVENT\r
BEGIN:VEVENT\r
DTSTART;TZID=America/New_York:20250822T190000\r
DTEND;TZID=America/New_York:20250822T210000\r
SUMMARY:Fall Concert &amp; Reception\r
DESCRIPTION:Auditorium\\, doors open at\r
 6:30pm\r
BEGIN:VALARM\r
DESCRIPTION:Reminder\r
END:VALARM\r
END:VEVENT\r
BEGIN:VEVENT\r
DTSTART:20250901\r
END:VEVENT\r
BEGIN:VEVENT\r
SUMMARY:No start\r
END:VEVENT\r
BEGIN:VEVENT\r
SUMMARY:Broken start\r
DTSTART:sometime\r
END:VEVENT\r
END:VCALENDAR\r
";

    #[test]
    fn extracts_well_formed_blocks_and_drops_the_rest() {
        let events = extract(FEED);
        assert_eq!(events.len(), 2);

        let first = &events[0];
        assert_eq!(first.title, "First Day of School");
        assert_eq!(first.start_time, Utc.with_ymd_and_hms(2025, 8, 19, 4, 0, 0).unwrap());
        assert_eq!(first.raw_start, "20250819");
        assert_eq!(first.raw_end.as_deref(), Some("20250820"));
        assert_eq!(first.category, Category::Events);

        let concert = &events[1];
        assert_eq!(concert.title, "Fall Concert & Reception");
        assert_eq!(concert.start_time, Utc.with_ymd_and_hms(2025, 8, 22, 23, 0, 0).unwrap());
        assert_eq!(concert.end_time, Some(Utc.with_ymd_and_hms(2025, 8, 23, 1, 0, 0).unwrap()));
        // The wrapped "6:30pm" line holds a colon, so the heuristic keeps it apart.
        assert_eq!(concert.description.as_deref(), Some("Auditorium, doors open at"));
    }

    #[test]
    fn unparseable_end_keeps_event_with_no_end() {
        let events = extract(
            "BEGIN:VEVENT\nSUMMARY:Open House\nDTSTART:20250910T180000Z\nDTEND:later\nEND:VEVENT\n",
        );
        assert_eq!(events.len(), 1);
        assert!(events[0].end_time.is_none());
        assert_eq!(events[0].raw_end.as_deref(), Some("later"));
    }

    #[test]
    fn tzid_overrides_default_zone() {
        let events = extract(
            "BEGIN:VEVENT\nSUMMARY:Away Game\nDTSTART;TZID=America/Chicago:20251003T190000\nEND:VEVENT\n",
        );
        assert_eq!(events[0].start_time, Utc.with_ymd_and_hms(2025, 10, 4, 0, 0, 0).unwrap());
    }

    #[test]
    fn unterminated_block_is_discarded_when_next_begins() {
        let events = extract(
            "BEGIN:VEVENT\nSUMMARY:Lost\nBEGIN:VEVENT\nSUMMARY:Kept\nDTSTART:20250901\nEND:VEVENT\n",
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Kept");
    }

    #[test]
    fn lines_outside_blocks_are_ignored() {
        assert!(extract("SUMMARY:Stray\nDTSTART:20250901\n").is_empty());
    }
}
