//! Core domain model for bellcal: feeds, extracted events, assignments.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "bellcal-core";

/// Which named feed an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Schedule,
    Events,
    Arts,
    ImportantDates,
    Athletics,
    /// Assignment-like items routed to reconciliation instead of the snapshot.
    Assignments,
}

impl Category {
    pub const CALENDAR: [Category; 5] = [
        Category::Schedule,
        Category::Events,
        Category::Arts,
        Category::ImportantDates,
        Category::Athletics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Schedule => "schedule",
            Category::Events => "events",
            Category::Arts => "arts",
            Category::ImportantDates => "important_dates",
            Category::Athletics => "athletics",
            Category::Assignments => "assignments",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub name: String,
    pub url: String,
    pub category: Category,
}

/// An event extracted from a single VEVENT block. Never mutated after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub category: Category,
    pub description: Option<String>,
    pub raw_start: String,
    pub raw_end: Option<String>,
}

impl CalendarEvent {
    /// True when the event ends on a different calendar day (in `zone`) than it starts.
    pub fn is_multi_day(&self, zone: Tz) -> bool {
        match self.end_time {
            Some(end) => local_date(end, zone) != local_date(self.start_time, zone),
            None => false,
        }
    }
}

/// A tracked task. Feed-derived entries are keyed by normalized title during
/// reconciliation; `id` is only stable inside one persisted collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub title: String,
    pub raw_start: String,
    pub raw_end: String,
    pub description: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_user_created: bool,
    pub is_complete: bool,
}

impl Assignment {
    pub fn from_event(event: &CalendarEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: event.title.clone(),
            raw_start: event.raw_start.clone(),
            raw_end: event.raw_end.clone().unwrap_or_default(),
            description: event.description.clone().unwrap_or_default(),
            start_time: Some(event.start_time),
            end_time: event.end_time,
            is_user_created: false,
            is_complete: false,
        }
    }

    pub fn user_created(new: NewAssignment) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_start: new.start_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            raw_end: new.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            title: new.title,
            description: new.description,
            start_time: new.start_time,
            end_time: new.end_time,
            is_user_created: true,
            is_complete: false,
        }
    }

    /// Overwrite the feed-owned fields from `event`, keeping id and completion state.
    pub fn apply_feed_fields(&mut self, event: &CalendarEvent) {
        self.title = event.title.clone();
        self.raw_start = event.raw_start.clone();
        self.raw_end = event.raw_end.clone().unwrap_or_default();
        self.description = event.description.clone().unwrap_or_default();
        self.start_time = Some(event.start_time);
        self.end_time = event.end_time;
    }
}

/// Input for a user-added assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssignment {
    pub title: String,
    pub description: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// A school rotation label ("Day 3") pinned to the date it falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationDay {
    pub day_number: u32,
    pub date: DateTime<Utc>,
}

/// The generic calendar cache, replaced wholesale on each successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub rotation_days: Vec<RotationDay>,
    pub events_by_category: BTreeMap<Category, Vec<CalendarEvent>>,
    pub last_refresh_at: DateTime<Utc>,
}

pub fn local_date(instant: DateTime<Utc>, zone: Tz) -> NaiveDate {
    instant.with_timezone(&zone).date_naive()
}
