//! Feed format adapters: iCalendar-like text in, typed events out.

pub mod dates;
pub mod extract;
pub mod fields;
pub mod rotation;
pub mod unfold;

use bellcal_core::{CalendarEvent, Category};
use bellcal_storage::FetchedFeed;
use chrono_tz::Tz;
use thiserror::Error;

pub use dates::{parse_feed_date, DateFormat};
pub use extract::extract_events;
pub use rotation::{derive_rotation_days, rotation_day_number};
pub use unfold::{HeuristicUnfolder, LineUnfolder, RfcUnfolder};

pub const CRATE_NAME: &str = "bellcal-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("feed {feed} is not a calendar document")]
    NotCalendar { feed: String },
}

pub trait FeedAdapter: Send + Sync {
    fn parse_text(&self, feed_name: &str, body: &str, category: Category)
        -> Result<Vec<CalendarEvent>, AdapterError>;

    fn parse_feed(&self, fetched: &FetchedFeed) -> Result<Vec<CalendarEvent>, AdapterError> {
        self.parse_text(&fetched.feed.name, &fetched.body, fetched.feed.category)
    }
}

/// The iCalendar-like adapter, generic over the line unfolding strategy.
#[derive(Debug, Clone)]
pub struct IcsFeedAdapter<U = HeuristicUnfolder> {
    unfolder: U,
    default_zone: Tz,
}

impl IcsFeedAdapter<HeuristicUnfolder> {
    pub fn new(default_zone: Tz) -> Self {
        Self::with_unfolder(HeuristicUnfolder, default_zone)
    }
}

impl<U: LineUnfolder> IcsFeedAdapter<U> {
    pub fn with_unfolder(unfolder: U, default_zone: Tz) -> Self {
        Self {
            unfolder,
            default_zone,
        }
    }

    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }
}

impl<U: LineUnfolder> FeedAdapter for IcsFeedAdapter<U> {
    /// A body that never opens a VCALENDAR (an HTML error page served with 200,
    /// say) is rejected rather than read as "no events".
    fn parse_text(
        &self,
        feed_name: &str,
        body: &str,
        category: Category,
    ) -> Result<Vec<CalendarEvent>, AdapterError> {
        if !body.contains("BEGIN:VCALENDAR") {
            return Err(AdapterError::NotCalendar {
                feed: feed_name.to_string(),
            });
        }
        let lines = self.unfolder.unfold(body);
        Ok(extract_events(&lines, category, self.default_zone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    const SCHEDULE: &str = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nDTSTART;VALUE=DATE:20250902\r\nSUMMARY:Day 1\r\nEND:VEVENT\r\nBEGIN:VEVENT\r\nDTSTART;VALUE=DATE:20250903\r\nSUMMARY:Day 2 - Gold\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn schedule_feed_to_rotation_days() {
        let adapter = IcsFeedAdapter::new(New_York);
        let events = adapter
            .parse_text("schedule", SCHEDULE, Category::Schedule)
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.category == Category::Schedule));

        let days = derive_rotation_days(&events);
        assert_eq!(
            days.iter().map(|d| d.day_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn html_error_page_is_rejected() {
        let adapter = IcsFeedAdapter::new(New_York);
        let err = adapter
            .parse_text("arts", "<html><body>Maintenance</body></html>", Category::Arts)
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotCalendar { .. }));
    }

    #[test]
    fn unfolder_strategy_is_swappable() {
        let body = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nSUMMARY:Robotics\r\n  Showcase: Finals\r\nDTSTART:20251101T140000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

        let strict = IcsFeedAdapter::with_unfolder(RfcUnfolder, New_York);
        let events = strict.parse_text("events", body, Category::Events).unwrap();
        assert_eq!(events[0].title, "Robotics Showcase: Finals");

        let lenient = IcsFeedAdapter::new(New_York);
        let events = lenient.parse_text("events", body, Category::Events).unwrap();
        assert_eq!(events[0].title, "Robotics");
    }
}
