use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bellcal_core::{Category, FeedDescriptor};
use bellcal_storage::HttpClientConfig;
use chrono_tz::Tz;
use serde::Deserialize;
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedRegistry {
    pub feeds: Vec<FeedDescriptor>,
    #[serde(default)]
    pub assignments: Option<AssignmentFeed>,
}

/// The optional feed whose events are reconciled into the assignment list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignmentFeed {
    pub name: String,
    pub url: String,
}

impl AssignmentFeed {
    pub fn descriptor(&self) -> FeedDescriptor {
        FeedDescriptor {
            name: self.name.clone(),
            url: self.url.clone(),
            category: Category::Assignments,
        }
    }
}

impl FeedRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text).context("parsing feed registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for feed in self.all_feeds() {
            if !names.insert(feed.name.clone()) {
                bail!("duplicate feed name {:?}", feed.name);
            }
        }
        let schedules = self
            .feeds
            .iter()
            .filter(|f| f.category == Category::Schedule)
            .count();
        if schedules > 1 {
            bail!("at most one feed may use the schedule category, found {schedules}");
        }
        if let Some(feed) = self.feeds.iter().find(|f| f.category == Category::Assignments) {
            bail!(
                "feed {:?} uses the assignments category; declare it under `assignments:` instead",
                feed.name
            );
        }
        Ok(())
    }

    /// Calendar feeds followed by the assignment feed, if any.
    pub fn all_feeds(&self) -> Vec<FeedDescriptor> {
        let mut feeds = self.feeds.clone();
        feeds.extend(self.assignments.as_ref().map(AssignmentFeed::descriptor));
        feeds
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub feeds_file: PathBuf,
    pub store_dir: PathBuf,
    pub timezone: Tz,
    pub cache_ttl: Duration,
    pub refresh_check_interval: Duration,
    pub scheduler_enabled: bool,
    pub user_agent: String,
    pub accept_language: String,
    pub http_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feeds_file: PathBuf::from("./feeds.yaml"),
            store_dir: PathBuf::from("./.bellcal"),
            timezone: chrono_tz::America::New_York,
            cache_ttl: Duration::from_secs(6 * 60 * 60),
            refresh_check_interval: Duration::from_secs(15 * 60),
            scheduler_enabled: true,
            user_agent: "bellcal/0.1".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            http_timeout_secs: 20,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let timezone = match std::env::var("BELLCAL_TIMEZONE") {
            Ok(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("BELLCAL_TIMEZONE={name}: {e}"))?,
            Err(_) => defaults.timezone,
        };
        Ok(Self {
            feeds_file: std::env::var("BELLCAL_FEEDS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.feeds_file),
            store_dir: std::env::var("BELLCAL_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
            timezone,
            cache_ttl: env_secs("BELLCAL_CACHE_TTL_SECS").unwrap_or(defaults.cache_ttl),
            refresh_check_interval: env_secs("BELLCAL_REFRESH_CHECK_SECS")
                .unwrap_or(defaults.refresh_check_interval),
            scheduler_enabled: std::env::var("BELLCAL_SCHEDULER_ENABLED")
                .map(|v| !matches!(v.as_str(), "0" | "false" | "FALSE" | "False"))
                .unwrap_or(defaults.scheduler_enabled),
            user_agent: std::env::var("BELLCAL_USER_AGENT").unwrap_or(defaults.user_agent),
            accept_language: std::env::var("BELLCAL_ACCEPT_LANGUAGE")
                .unwrap_or(defaults.accept_language),
            http_timeout_secs: std::env::var("BELLCAL_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
        })
    }

    /// The periodic check must fire more often than the TTL expires.
    pub fn effective_check_interval(&self) -> Duration {
        if self.refresh_check_interval.is_zero() || self.refresh_check_interval >= self.cache_ttl {
            (self.cache_ttl / 2).max(Duration::from_secs(1))
        } else {
            self.refresh_check_interval
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            accept_language: self.accept_language.clone(),
            ..Default::default()
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}
