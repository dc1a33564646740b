//! Assignments grouped by local due date, plus the day range and Monday-aligned
//! week starts a navigator pages through.

use std::collections::BTreeMap;

use bellcal_core::{local_date, Assignment};
use chrono::{Datelike, NaiveDate, TimeDelta};
use chrono_tz::Tz;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayIndex {
    by_day: BTreeMap<NaiveDate, Vec<Assignment>>,
}

impl DayIndex {
    /// Groups by the local date of each end time. Anything without one is
    /// filed under `today`.
    pub fn build(assignments: &[Assignment], today: NaiveDate, zone: Tz) -> Self {
        let mut by_day: BTreeMap<NaiveDate, Vec<Assignment>> = BTreeMap::new();
        for assignment in assignments {
            let day = assignment
                .end_time
                .map(|end| local_date(end, zone))
                .unwrap_or(today);
            by_day.entry(day).or_default().push(assignment.clone());
        }
        Self { by_day }
    }

    pub fn is_empty(&self) -> bool {
        self.by_day.is_empty()
    }

    pub fn assignments_on(&self, day: NaiveDate) -> &[Assignment] {
        self.by_day.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sorted, distinct days that have at least one assignment.
    pub fn days(&self) -> Vec<NaiveDate> {
        self.by_day.keys().copied().collect()
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        self.by_day.keys().next().copied()
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.by_day.keys().next_back().copied()
    }

    /// Every day from the earliest to the latest, inclusive, gaps filled.
    pub fn day_range(&self) -> Vec<NaiveDate> {
        match (self.first_day(), self.last_day()) {
            (Some(first), Some(last)) => first.iter_days().take_while(|d| *d <= last).collect(),
            _ => Vec::new(),
        }
    }

    /// Mondays from the week holding the earliest day to the week holding the latest.
    pub fn week_starts(&self) -> Vec<NaiveDate> {
        let (Some(first), Some(last)) = (self.first_day(), self.last_day()) else {
            return Vec::new();
        };
        let last_week = week_start(last);
        first
            .iter_weeks()
            .map(week_start)
            .take_while(|monday| *monday <= last_week)
            .collect()
    }
}

pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - TimeDelta::days(i64::from(day.weekday().num_days_from_monday()))
}
