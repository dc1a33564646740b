//! Feed date strings to absolute instants.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

/// The concrete shapes a feed date value can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `20250819`
    DateOnly,
    /// `20250819T090000`, floating or TZID-qualified
    LocalDateTime,
    /// `20250819T090000Z`
    UtcDateTime,
}

impl DateFormat {
    /// Attempt order when the key gave no hint.
    pub const ALL: [DateFormat; 3] = [
        DateFormat::DateOnly,
        DateFormat::LocalDateTime,
        DateFormat::UtcDateTime,
    ];

    pub fn expected_len(self) -> usize {
        match self {
            DateFormat::DateOnly => 8,
            DateFormat::LocalDateTime => 15,
            DateFormat::UtcDateTime => 16,
        }
    }

    pub fn for_length(len: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.expected_len() == len)
    }

    /// Parse `raw` strictly in this format. Date-only and local values are
    /// read in `zone`; the UTC form ignores it.
    pub fn parse(self, raw: &str, zone: Tz) -> Option<DateTime<Utc>> {
        if raw.len() != self.expected_len() {
            return None;
        }
        match self {
            DateFormat::DateOnly => {
                let date = NaiveDate::parse_from_str(raw, "%Y%m%d").ok()?;
                localize(date.and_hms_opt(0, 0, 0)?, zone)
            }
            DateFormat::LocalDateTime => {
                let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S").ok()?;
                localize(naive, zone)
            }
            DateFormat::UtcDateTime => {
                let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%SZ").ok()?;
                Some(Utc.from_utc_datetime(&naive))
            }
        }
    }
}

/// Parse a feed date. A hinted format is tried first; if it fails (or there is
/// no hint) the three formats are tried in [`DateFormat::ALL`] order.
/// Unparseable input yields `None`.
pub fn parse_feed_date(raw: &str, hint: Option<DateFormat>, zone: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(parsed) = hint.and_then(|format| format.parse(raw, zone)) {
        return Some(parsed);
    }
    DateFormat::ALL
        .into_iter()
        .find_map(|format| format.parse(raw, zone))
}

/// Resolve a `TZID` parameter value to a zone, if it names a known IANA zone.
pub fn zone_from_tzid(tzid: &str) -> Option<Tz> {
    tzid.trim().trim_matches('"').parse::<Tz>().ok()
}

fn localize(naive: NaiveDateTime, zone: Tz) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
        // Spring-forward gap: the wall time does not exist, so move past it.
        LocalResult::None => zone
            .from_local_datetime(&(naive + TimeDelta::hours(1)))
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    #[test]
    fn date_only_is_local_midnight() {
        let parsed = parse_feed_date("20250819", None, New_York).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 19, 4, 0, 0).unwrap());
    }

    #[test]
    fn local_date_time_uses_default_zone() {
        let parsed = parse_feed_date("20250819T090000", None, New_York).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 19, 13, 0, 0).unwrap());
    }

    #[test]
    fn trailing_z_is_utc() {
        let parsed = parse_feed_date("20250819T090000Z", None, New_York).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 8, 19, 9, 0, 0).unwrap());
    }

    #[test]
    fn hint_mismatch_falls_back_to_shape() {
        let parsed = parse_feed_date("20250819T090000Z", Some(DateFormat::DateOnly), New_York);
        assert_eq!(parsed, Some(Utc.with_ymd_and_hms(2025, 8, 19, 9, 0, 0).unwrap()));
    }

    #[test]
    fn garbage_is_none() {
        assert!(parse_feed_date("2025-08-19", None, New_York).is_none());
        assert!(parse_feed_date("", None, New_York).is_none());
        assert!(parse_feed_date("20251340", Some(DateFormat::DateOnly), New_York).is_none());
    }

    #[test]
    fn length_dispatch_table() {
        assert_eq!(DateFormat::for_length(8), Some(DateFormat::DateOnly));
        assert_eq!(DateFormat::for_length(15), Some(DateFormat::LocalDateTime));
        assert_eq!(DateFormat::for_length(16), Some(DateFormat::UtcDateTime));
        assert_eq!(DateFormat::for_length(10), None);
    }

    #[test]
    fn dst_gap_moves_forward() {
        // 02:30 on 2025-03-09 does not exist in New York.
        let parsed = parse_feed_date("20250309T023000", None, New_York).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 9, 7, 30, 0).unwrap());
    }

    #[test]
    fn tzid_resolves_known_zones_only() {
        assert_eq!(zone_from_tzid("\"Europe/London\""), Some(chrono_tz::Europe::London));
        assert!(zone_from_tzid("Eastern Standard Time").is_none());
    }
}
