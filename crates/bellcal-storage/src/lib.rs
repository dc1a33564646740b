//! Key-value persistence + HTTP feed fetch utilities for bellcal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bellcal_core::FeedDescriptor;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub use reqwest::StatusCode;

pub const CRATE_NAME: &str = "bellcal-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Opaque byte-blob persistence.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// One file per key under `root`, named by the SHA-256 of the key.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.bin", Self::sha256_hex(key.as_bytes())))
    }

    fn io_error(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for_key(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(key)(err)),
        }
    }

    /// Write via a temp file and atomic rename so readers never see a partial value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating store directory {}", self.root.display()))?;

        let final_path = self.path_for_key(key);
        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), value.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(Self::io_error(key))?;
        file.write_all(value).await.map_err(Self::io_error(key))?;
        file.flush().await.map_err(Self::io_error(key))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Self::io_error(key)(err));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: "bellcal/0.1".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            global_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub feed: FeedDescriptor,
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for {feed} failed: {source}")]
    Request {
        feed: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("body from {url} is not valid UTF-8")]
    Decode { url: String },
    #[error("http client error: {0}")]
    Client(String),
}

/// Feed fetcher: fixed header set, per-request timeout, bounded concurrency.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/calendar,*/*"),
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        let language = HeaderValue::from_str(&config.accept_language)
            .map_err(|e| FetchError::Client(format!("invalid Accept-Language: {e}")))?;
        headers.insert(ACCEPT_LANGUAGE, language);
        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| FetchError::Client(format!("invalid User-Agent: {e}")))?;
        headers.insert(USER_AGENT, agent);

        // gzip/brotli also advertise Accept-Encoding and decode transparently.
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }

    pub async fn fetch_feed(
        &self,
        run_id: Uuid,
        feed: &FeedDescriptor,
    ) -> Result<FetchedFeed, FetchError> {
        let span = info_span!("feed_fetch", %run_id, feed = %feed.name, url = %feed.url);
        self.fetch_feed_inner(feed).instrument(span).await
    }

    async fn fetch_feed_inner(&self, feed: &FeedDescriptor) -> Result<FetchedFeed, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Client("fetch limiter closed".to_string()))?;

        let resp = self
            .client
            .get(&feed.url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                feed: feed.name.clone(),
                source,
            })?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let bytes = resp.bytes().await.map_err(|source| FetchError::Request {
            feed: feed.name.clone(),
            source,
        })?;
        let body = String::from_utf8(bytes.to_vec())
            .map_err(|_| FetchError::Decode { url: final_url.clone() })?;
        debug!(status = status.as_u16(), bytes = body.len(), "feed fetched");
        Ok(FetchedFeed {
            feed: feed.clone(),
            status,
            final_url,
            body,
            fetched_at: Utc::now(),
        })
    }

    /// Fetch every feed concurrently; the first failure fails the whole call.
    pub async fn fetch_all(
        &self,
        run_id: Uuid,
        feeds: &[FeedDescriptor],
    ) -> Result<Vec<FetchedFeed>, FetchError> {
        futures::future::try_join_all(feeds.iter().map(|feed| self.fetch_feed(run_id, feed))).await
    }

    /// Fetch every feed concurrently and report each outcome, in `feeds` order.
    pub async fn fetch_all_settled(
        &self,
        run_id: Uuid,
        feeds: &[FeedDescriptor],
    ) -> Vec<Result<FetchedFeed, FetchError>> {
        futures::future::join_all(feeds.iter().map(|feed| self.fetch_feed(run_id, feed))).await
    }
}
