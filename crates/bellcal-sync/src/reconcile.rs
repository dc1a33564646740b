//! Merging freshly extracted feed items into the persisted assignment list.
//!
//! Feeds carry no stable identifiers, so feed-derived assignments are matched
//! on a natural key (by default the trimmed, case-folded title). For any two
//! non-user-created assignments the key is unique; the merge keeps it that way.

use std::collections::{HashMap, HashSet};

use bellcal_core::{Assignment, CalendarEvent};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Best-effort natural key used to pair feed items with persisted assignments.
pub trait MatchKey: Send + Sync {
    fn event_key(&self, event: &CalendarEvent) -> String;
    fn assignment_key(&self, assignment: &Assignment) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedTitle;

impl MatchKey for NormalizedTitle {
    fn event_key(&self, event: &CalendarEvent) -> String {
        normalize_title(&event.title)
    }

    fn assignment_key(&self, assignment: &Assignment) -> String {
        normalize_title(&assignment.title)
    }
}

pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// Pruning only runs when the batch holds more than this many items.
    pub prune_min_batch: usize,
    /// Month and day the school year starts; items ending before the most
    /// recent such date are marked complete.
    pub school_year_start: (u32, u32),
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            prune_min_batch: 5,
            school_year_start: (7, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub updated: usize,
    pub added: usize,
    pub expired: usize,
    pub pruned: usize,
}

pub struct ReconciliationEngine {
    config: ReconcileConfig,
    key: Box<dyn MatchKey>,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(ReconcileConfig::default())
    }
}

impl ReconciliationEngine {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            key: Box::new(NormalizedTitle),
        }
    }

    pub fn with_key(mut self, key: Box<dyn MatchKey>) -> Self {
        self.key = key;
        self
    }

    /// Merge `new_batch` into `existing`. Never fails; anything unmatched is appended.
    ///
    /// Matched entries take the feed's content but keep their id and
    /// `is_complete`. Feed-derived entries that ended before the school-year
    /// cutoff are forced complete (never un-completed). When the batch is large
    /// enough to be trusted, feed-derived entries missing from it are dropped.
    /// User-created entries are left alone throughout.
    pub fn reconcile(
        &self,
        new_batch: &[CalendarEvent],
        existing: Vec<Assignment>,
        now: DateTime<Utc>,
        zone: Tz,
    ) -> (Vec<Assignment>, ReconcileReport) {
        let mut report = ReconcileReport::default();
        let mut merged = existing;

        let mut by_key: HashMap<String, usize> = HashMap::new();
        for (idx, assignment) in merged.iter().enumerate() {
            if !assignment.is_user_created {
                by_key
                    .entry(self.key.assignment_key(assignment))
                    .or_insert(idx);
            }
        }

        for event in new_batch {
            let key = self.key.event_key(event);
            match by_key.get(&key) {
                Some(&idx) => {
                    merged[idx].apply_feed_fields(event);
                    report.updated += 1;
                }
                None => {
                    merged.push(Assignment::from_event(event));
                    by_key.insert(key, merged.len() - 1);
                    report.added += 1;
                }
            }
        }

        let cutoff = school_year_cutoff(now, zone, self.config.school_year_start);
        for assignment in merged.iter_mut().filter(|a| !a.is_user_created) {
            if !assignment.is_complete && assignment.end_time.is_some_and(|end| end < cutoff) {
                assignment.is_complete = true;
                report.expired += 1;
            }
        }

        if new_batch.len() > self.config.prune_min_batch {
            let live: HashSet<String> = new_batch.iter().map(|e| self.key.event_key(e)).collect();
            let before = merged.len();
            merged.retain(|a| a.is_user_created || live.contains(&self.key.assignment_key(a)));
            report.pruned = before - merged.len();
        }

        (merged, report)
    }
}

/// Local midnight of the most recent `(month, day)` at or before `now`.
pub fn school_year_cutoff(now: DateTime<Utc>, zone: Tz, (month, day): (u32, u32)) -> DateTime<Utc> {
    let today = now.with_timezone(&zone).date_naive();
    let year = if (today.month(), today.day()) >= (month, day) {
        today.year()
    } else {
        today.year() - 1
    };
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|midnight| midnight.and_local_timezone(zone).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellcal_core::{Category, NewAssignment};
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 15, 16, 0, 0).unwrap()
    }

    fn event(title: &str, due: DateTime<Utc>) -> CalendarEvent {
        CalendarEvent {
            title: title.to_string(),
            start_time: due,
            end_time: Some(due),
            category: Category::Assignments,
            description: Some(format!("{title} details")),
            raw_start: due.format("%Y%m%dT%H%M%SZ").to_string(),
            raw_end: Some(due.format("%Y%m%dT%H%M%SZ").to_string()),
        }
    }

    fn due(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, day, 23, 59, 0).unwrap()
    }

    fn batch(titles: &[&str]) -> Vec<CalendarEvent> {
        titles.iter().map(|t| event(t, due(20))).collect()
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::default()
    }

    #[test]
    fn cutoff_is_most_recent_july_first() {
        let cutoff = school_year_cutoff(now(), New_York, (7, 1));
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2025, 7, 1, 4, 0, 0).unwrap());

        let spring = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let cutoff = school_year_cutoff(spring, New_York, (7, 1));
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2025, 7, 1, 4, 0, 0).unwrap());

        let on_the_day = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        assert_eq!(school_year_cutoff(on_the_day, New_York, (7, 1)), cutoff);
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let new_batch = batch(&["Essay", "Lab Report", "Worksheet 3"]);
        let (once, report) = engine().reconcile(&new_batch, Vec::new(), now(), New_York);
        assert_eq!(report.added, 3);

        let (twice, report) = engine().reconcile(&new_batch, once.clone(), now(), New_York);
        assert_eq!(twice, once);
        assert_eq!(report.added, 0);
        assert_eq!(report.updated, 3);
    }

    #[test]
    fn completion_survives_case_and_whitespace_changes() {
        let (mut existing, _) = engine().reconcile(&batch(&["Essay"]), Vec::new(), now(), New_York);
        existing[0].is_complete = true;
        let id = existing[0].id;

        let (merged, _) = engine().reconcile(&batch(&["essay "]), existing, now(), New_York);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, id);
        assert_eq!(merged[0].title, "essay ");
        assert!(merged[0].is_complete);
    }

    #[test]
    fn feed_content_replaces_stale_fields() {
        let (existing, _) = engine().reconcile(&batch(&["Essay"]), Vec::new(), now(), New_York);
        let moved = vec![event("Essay", due(28))];
        let (merged, _) = engine().reconcile(&moved, existing, now(), New_York);
        assert_eq!(merged[0].end_time, Some(due(28)));
        assert_eq!(merged[0].raw_end, "20251028T235900Z");
    }

    #[test]
    fn duplicate_titles_in_one_batch_collapse() {
        let new_batch = batch(&["Quiz", "QUIZ", "Essay"]);
        let (merged, report) = engine().reconcile(&new_batch, Vec::new(), now(), New_York);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "QUIZ");
        assert_eq!(report.added, 2);
        assert_eq!(report.updated, 1);
    }

    #[test]
    fn past_school_year_items_are_ratcheted_complete() {
        let last_year = Utc.with_ymd_and_hms(2025, 5, 30, 12, 0, 0).unwrap();
        let (merged, report) = engine().reconcile(
            &[event("Final Project", last_year)],
            Vec::new(),
            now(),
            New_York,
        );
        assert!(merged[0].is_complete);
        assert_eq!(report.expired, 1);

        // Later passes never clear it, even when the feed moves the date forward.
        let (merged, report) = engine().reconcile(
            &[event("Final Project", due(30))],
            merged,
            now(),
            New_York,
        );
        assert!(merged[0].is_complete);
        assert_eq!(report.expired, 0);
    }

    #[test]
    fn small_batches_never_prune() {
        let (existing, _) = engine().reconcile(
            &batch(&["A", "B", "C", "D", "E", "F", "G"]),
            Vec::new(),
            now(),
            New_York,
        );
        let (merged, report) =
            engine().reconcile(&batch(&["A", "B", "C", "D", "E"]), existing, now(), New_York);
        assert_eq!(merged.len(), 7);
        assert_eq!(report.pruned, 0);
    }

    #[test]
    fn large_batches_prune_missing_feed_items_only() {
        let (mut existing, _) = engine().reconcile(&batch(&["Old One", "Old Two"]), Vec::new(), now(), New_York);
        existing.push(Assignment::user_created(NewAssignment {
            title: "Old One".to_string(),
            ..Default::default()
        }));

        let (merged, report) = engine().reconcile(
            &batch(&["A", "B", "C", "D", "E", "F"]),
            existing,
            now(),
            New_York,
        );
        assert_eq!(report.pruned, 2);
        assert_eq!(merged.len(), 7);
        assert!(merged.iter().any(|a| a.is_user_created && a.title == "Old One"));
        assert!(!merged.iter().any(|a| !a.is_user_created && a.title.starts_with("Old")));
    }

    #[test]
    fn user_created_items_are_never_match_candidates() {
        let mine = Assignment::user_created(NewAssignment {
            title: "Essay".to_string(),
            end_time: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        });
        let (merged, report) = engine().reconcile(&batch(&["essay"]), vec![mine.clone()], now(), New_York);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], mine);
        assert_eq!(report.added, 1);
        assert_eq!(report.expired, 0);
    }

    #[test]
    fn custom_match_key_changes_pairing() {
        struct ByStart;
        impl MatchKey for ByStart {
            fn event_key(&self, event: &CalendarEvent) -> String {
                event.raw_start.clone()
            }
            fn assignment_key(&self, assignment: &Assignment) -> String {
                assignment.raw_start.clone()
            }
        }

        let engine = ReconciliationEngine::default().with_key(Box::new(ByStart));
        let (existing, _) = engine.reconcile(&[event("Essay", due(20))], Vec::new(), now(), New_York);
        let (merged, _) = engine.reconcile(&[event("Essay (revised)", due(20))], existing, now(), New_York);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Essay (revised)");
    }
}
