//! The calendar cache: persisted snapshot + assignments, TTL-driven refresh
//! through a single writer, and the query surface the UI host reads from.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bellcal_adapters::{derive_rotation_days, AdapterError, FeedAdapter, IcsFeedAdapter};
use bellcal_core::{
    local_date, Assignment, CachedSnapshot, CalendarEvent, Category, FeedDescriptor, NewAssignment,
    RotationDay,
};
use bellcal_storage::{FetchError, KvStore, StorageError};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{FeedRegistry, SyncConfig};
use crate::index::DayIndex;
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::source::FeedSource;

pub const SNAPSHOT_KEY: &str = "bellcal.snapshot";
pub const ASSIGNMENTS_KEY: &str = "bellcal.assignments";
pub const LAST_REFRESH_KEY: &str = "bellcal.last_refresh_at";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// The cache was within its TTL; nothing was fetched.
    Fresh,
    Refreshed(RefreshSummary),
    /// Another cycle finished while this request waited for the writer gate.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub refreshed_at: DateTime<Utc>,
    pub feeds: usize,
    pub events: usize,
    pub rotation_days: usize,
    pub assignments: Option<ReconcileReport>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Calendar feeds plus the assignment feed, if configured.
    pub feeds: Vec<FeedDescriptor>,
    pub timezone: Tz,
    pub cache_ttl: Duration,
    pub check_interval: Duration,
    pub scheduler_enabled: bool,
}

impl ServiceSettings {
    pub fn from_config(config: &SyncConfig, registry: FeedRegistry) -> Self {
        Self {
            feeds: registry.all_feeds(),
            timezone: config.timezone,
            cache_ttl: config.cache_ttl,
            check_interval: config.effective_check_interval(),
            scheduler_enabled: config.scheduler_enabled,
        }
    }
}

pub struct CalendarService {
    settings: ServiceSettings,
    store: Arc<dyn KvStore>,
    source: Arc<dyn FeedSource>,
    adapter: Box<dyn FeedAdapter>,
    engine: ReconciliationEngine,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Option<CachedSnapshot>>,
    assignments: Mutex<Vec<Assignment>>,
    refresh_gate: Mutex<()>,
    generation: AtomicU64,
}

impl CalendarService {
    pub fn new(
        settings: ServiceSettings,
        store: Arc<dyn KvStore>,
        source: Arc<dyn FeedSource>,
    ) -> Self {
        let adapter = Box::new(IcsFeedAdapter::new(settings.timezone));
        Self {
            settings,
            store,
            source,
            adapter,
            engine: ReconciliationEngine::default(),
            clock: Arc::new(SystemClock),
            snapshot: RwLock::new(None),
            assignments: Mutex::new(Vec::new()),
            refresh_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_adapter(mut self, adapter: Box<dyn FeedAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_engine(mut self, engine: ReconciliationEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Load persisted state. An unreadable snapshot is only a cache miss; an
    /// unreadable assignment list holds user data and fails the open.
    ///
    /// The last-refresh timestamp is written after everything else, so a
    /// snapshot is only trusted when its own timestamp matches it.
    pub async fn open(mut self) -> Result<Arc<Self>, SyncError> {
        let snapshot = match self.store.get(SNAPSHOT_KEY).await? {
            Some(bytes) => match serde_json::from_slice::<CachedSnapshot>(&bytes) {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    warn!(error = %err, "discarding unreadable cached snapshot");
                    None
                }
            },
            None => None,
        };
        let snapshot = match (snapshot, self.load_last_refresh().await?) {
            (Some(snapshot), Some(stamp)) if snapshot.last_refresh_at == stamp => Some(snapshot),
            (Some(snapshot), stamp) => {
                warn!(
                    snapshot_at = %snapshot.last_refresh_at,
                    recorded_at = ?stamp,
                    "cached snapshot is from an unfinished refresh; discarding"
                );
                None
            }
            (None, _) => None,
        };

        let assignments = match self.store.get(ASSIGNMENTS_KEY).await? {
            Some(bytes) => serde_json::from_slice::<Vec<Assignment>>(&bytes)?,
            None => Vec::new(),
        };

        debug!(
            cached = snapshot.is_some(),
            assignments = assignments.len(),
            "calendar cache opened"
        );
        *self.snapshot.get_mut().unwrap_or_else(PoisonError::into_inner) = snapshot;
        *self.assignments.get_mut() = assignments;
        Ok(Arc::new(self))
    }

    async fn load_last_refresh(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let Some(bytes) = self.store.get(LAST_REFRESH_KEY).await? else {
            return Ok(None);
        };
        let parsed = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|text| DateTime::parse_from_rfc3339(text.trim()).ok())
            .map(|t| t.with_timezone(&Utc));
        if parsed.is_none() {
            warn!("ignoring unreadable last-refresh timestamp");
        }
        Ok(parsed)
    }

    /// Kick off the initial refresh when stale and, if enabled, the periodic
    /// staleness check. The scheduled job holds a weak reference, so dropping
    /// the service stops it from doing work.
    pub async fn start(self: &Arc<Self>) -> Result<ServiceHandle, SyncError> {
        let initial = (self.freshness() == Freshness::Stale).then(|| {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = service.check_and_refresh().await {
                    warn!(error = %err, "initial refresh failed; serving cached data");
                }
            })
        });

        let scheduler = if self.settings.scheduler_enabled {
            let sched = JobScheduler::new().await?;
            let weak = Arc::downgrade(self);
            let job = Job::new_repeated_async(self.settings.check_interval, move |_uuid, _l| {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(service) = weak.upgrade() else {
                        return;
                    };
                    match service.check_and_refresh().await {
                        Ok(outcome) => debug!(?outcome, "periodic staleness check"),
                        Err(err) => warn!(error = %err, "scheduled refresh failed; serving cached data"),
                    }
                })
            })?;
            sched.add(job).await?;
            sched.start().await?;
            Some(sched)
        } else {
            None
        };

        Ok(ServiceHandle { initial, scheduler })
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn freshness(&self) -> Freshness {
        let Some(last) = self.last_refresh_at() else {
            return Freshness::Stale;
        };
        let ttl = TimeDelta::from_std(self.settings.cache_ttl).unwrap_or(TimeDelta::MAX);
        // A timestamp in the future means the clock moved backwards.
        let age = self.clock.now() - last;
        if age < TimeDelta::zero() || age >= ttl {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    pub fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.read_snapshot(|snapshot| snapshot.map(|s| s.last_refresh_at))
    }

    /// Refresh only if the cache is stale.
    pub async fn check_and_refresh(&self) -> Result<RefreshOutcome, SyncError> {
        self.refresh(false).await
    }

    pub async fn force_refresh(&self) -> Result<RefreshOutcome, SyncError> {
        self.refresh(true).await
    }

    async fn refresh(&self, force: bool) -> Result<RefreshOutcome, SyncError> {
        let seen = self.generation.load(Ordering::SeqCst);
        let _gate = self.refresh_gate.lock().await;
        if force {
            if self.generation.load(Ordering::SeqCst) != seen {
                return Ok(RefreshOutcome::Coalesced);
            }
        } else if self.freshness() == Freshness::Fresh {
            return Ok(RefreshOutcome::Fresh);
        }

        let run_id = Uuid::new_v4();
        let summary = self
            .ingest(run_id)
            .instrument(info_span!("ingest", %run_id))
            .await
            .inspect_err(|err| warn!(error = %err, "refresh abandoned; keeping cached data"))?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(RefreshOutcome::Refreshed(summary))
    }

    /// One full cycle. Nothing in memory changes unless every feed was
    /// fetched, parsed and persisted.
    async fn ingest(&self, run_id: Uuid) -> Result<RefreshSummary, SyncError> {
        let fetched = self.source.fetch_all(run_id, &self.settings.feeds).await?;

        let mut events_by_category: BTreeMap<Category, Vec<CalendarEvent>> = BTreeMap::new();
        let mut assignment_batch: Option<Vec<CalendarEvent>> = None;
        for feed in &fetched {
            let events = self.adapter.parse_feed(feed)?;
            debug!(feed = %feed.feed.name, events = events.len(), "feed parsed");
            if feed.feed.category == Category::Assignments {
                assignment_batch.get_or_insert_with(Vec::new).extend(events);
            } else {
                events_by_category
                    .entry(feed.feed.category)
                    .or_default()
                    .extend(events);
            }
        }
        for events in events_by_category.values_mut() {
            events.sort_by_key(|event| event.start_time);
        }

        let rotation_days = events_by_category
            .get(&Category::Schedule)
            .map(|events| derive_rotation_days(events))
            .unwrap_or_default();
        let now = self.clock.now();
        let snapshot = CachedSnapshot {
            rotation_days,
            events_by_category,
            last_refresh_at: now,
        };
        let snapshot_bytes = serde_json::to_vec(&snapshot)?;

        let mut assignments = self.assignments.lock().await;
        let merged = assignment_batch.as_ref().map(|batch| {
            self.engine
                .reconcile(batch, assignments.clone(), now, self.settings.timezone)
        });
        let merged_bytes = merged
            .as_ref()
            .map(|(list, _)| serde_json::to_vec(list))
            .transpose()?;

        // The timestamp goes last; `open` rejects a snapshot it does not match.
        if let Some(bytes) = &merged_bytes {
            self.store.set(ASSIGNMENTS_KEY, bytes).await?;
        }
        self.store.set(SNAPSHOT_KEY, &snapshot_bytes).await?;
        self.store
            .set(LAST_REFRESH_KEY, now.to_rfc3339().as_bytes())
            .await?;

        let report = merged.map(|(list, report)| {
            *assignments = list;
            report
        });
        drop(assignments);

        let summary = RefreshSummary {
            run_id,
            refreshed_at: now,
            feeds: fetched.len(),
            events: snapshot.events_by_category.values().map(Vec::len).sum(),
            rotation_days: snapshot.rotation_days.len(),
            assignments: report,
        };
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        info!(
            feeds = summary.feeds,
            events = summary.events,
            rotation_days = summary.rotation_days,
            assignments = ?summary.assignments,
            "calendar refreshed"
        );
        Ok(summary)
    }

    fn read_snapshot<T>(&self, f: impl FnOnce(Option<&CachedSnapshot>) -> T) -> T {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }

    /// Cached events for one category, or every calendar category ordered by start.
    pub fn events(&self, category: Option<Category>) -> Vec<CalendarEvent> {
        self.read_snapshot(|snapshot| {
            let Some(snapshot) = snapshot else {
                return Vec::new();
            };
            match category {
                Some(category) => snapshot
                    .events_by_category
                    .get(&category)
                    .cloned()
                    .unwrap_or_default(),
                None => {
                    let mut all: Vec<CalendarEvent> =
                        snapshot.events_by_category.values().flatten().cloned().collect();
                    all.sort_by_key(|event| event.start_time);
                    all
                }
            }
        })
    }

    pub fn rotation_days(&self) -> Vec<RotationDay> {
        self.read_snapshot(|snapshot| snapshot.map(|s| s.rotation_days.clone()).unwrap_or_default())
    }

    /// The rotation number for a local calendar date.
    pub fn rotation_day(&self, date: NaiveDate) -> Option<u32> {
        let zone = self.settings.timezone;
        self.read_snapshot(|snapshot| {
            snapshot?
                .rotation_days
                .iter()
                .find(|day| local_date(day.date, zone) == date)
                .map(|day| day.day_number)
        })
    }

    pub async fn assignments(&self) -> Vec<Assignment> {
        self.assignments.lock().await.clone()
    }

    pub async fn day_index(&self, today: NaiveDate) -> DayIndex {
        DayIndex::build(&self.assignments.lock().await, today, self.settings.timezone)
    }

    /// Flip completion; `None` if no assignment has `id`.
    pub async fn toggle_complete(&self, id: Uuid) -> Result<Option<bool>, SyncError> {
        self.update_assignments(|list| {
            let assignment = list.iter_mut().find(|a| a.id == id)?;
            assignment.is_complete = !assignment.is_complete;
            Some(assignment.is_complete)
        })
        .await
    }

    pub async fn add_user_assignment(&self, new: NewAssignment) -> Result<Assignment, SyncError> {
        let assignment = Assignment::user_created(new);
        self.update_assignments(|list| {
            list.push(assignment.clone());
            Some(())
        })
        .await?;
        Ok(assignment)
    }

    pub async fn delete_assignment(&self, id: Uuid) -> Result<bool, SyncError> {
        let removed = self
            .update_assignments(|list| {
                let idx = list.iter().position(|a| a.id == id)?;
                list.remove(idx);
                Some(())
            })
            .await?;
        Ok(removed.is_some())
    }

    /// Apply `edit` to a copy, persist it, then publish it. `None` from the
    /// edit means nothing changed and nothing is written.
    async fn update_assignments<T>(
        &self,
        edit: impl FnOnce(&mut Vec<Assignment>) -> Option<T>,
    ) -> Result<Option<T>, SyncError> {
        let mut assignments = self.assignments.lock().await;
        let mut next = assignments.clone();
        let Some(result) = edit(&mut next) else {
            return Ok(None);
        };
        self.store
            .set(ASSIGNMENTS_KEY, &serde_json::to_vec(&next)?)
            .await?;
        *assignments = next;
        Ok(Some(result))
    }
}

/// Keeps the background work started by [`CalendarService::start`] alive.
pub struct ServiceHandle {
    initial: Option<JoinHandle<()>>,
    scheduler: Option<JobScheduler>,
}

impl ServiceHandle {
    pub fn scheduler_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Wait for the start-up refresh, if one was triggered.
    pub async fn initial_refresh(&mut self) {
        if let Some(handle) = self.initial.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "initial refresh task did not finish");
            }
        }
    }

    /// Stop the periodic check. An in-flight start-up refresh is abandoned.
    pub async fn shutdown(mut self) -> Result<(), SyncError> {
        if let Some(handle) = self.initial.take() {
            handle.abort();
        }
        if let Some(mut sched) = self.scheduler.take() {
            sched.shutdown().await?;
        }
        Ok(())
    }
}
