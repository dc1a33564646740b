//! Ingestion pipeline, assignment reconciliation and the refreshed calendar cache.

pub mod clock;
pub mod config;
pub mod index;
pub mod reconcile;
pub mod service;
pub mod source;

use std::sync::Arc;

use anyhow::{Context, Result};
use bellcal_storage::{FileStore, HttpFetcher};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AssignmentFeed, FeedRegistry, SyncConfig};
pub use index::{week_start, DayIndex};
pub use reconcile::{
    normalize_title, school_year_cutoff, MatchKey, NormalizedTitle, ReconcileConfig,
    ReconcileReport, ReconciliationEngine,
};
pub use service::{
    CalendarService, Freshness, RefreshOutcome, RefreshSummary, ServiceHandle, ServiceSettings,
    SyncError, ASSIGNMENTS_KEY, LAST_REFRESH_KEY, SNAPSHOT_KEY,
};
pub use source::FeedSource;

pub const CRATE_NAME: &str = "bellcal-sync";

/// Wire up a file-backed, HTTP-fed service from `BELLCAL_*` settings.
/// The caller decides when to [`CalendarService::start`] it.
pub async fn open_from_env() -> Result<Arc<CalendarService>> {
    let config = SyncConfig::from_env()?;
    let registry = FeedRegistry::load(&config.feeds_file).await?;
    let fetcher = HttpFetcher::new(config.http_config()).context("building feed fetcher")?;
    let store = FileStore::new(&config.store_dir);
    CalendarService::new(
        ServiceSettings::from_config(&config, registry),
        Arc::new(store),
        Arc::new(fetcher),
    )
    .open()
    .await
    .with_context(|| format!("opening calendar cache in {}", config.store_dir.display()))
}
