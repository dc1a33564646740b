use async_trait::async_trait;
use bellcal_core::FeedDescriptor;
use bellcal_storage::{FetchError, FetchedFeed, HttpFetcher};
use uuid::Uuid;

/// Where an ingestion cycle gets feed bodies from.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// All feeds or nothing: the first failure fails the call.
    async fn fetch_all(
        &self,
        run_id: Uuid,
        feeds: &[FeedDescriptor],
    ) -> Result<Vec<FetchedFeed>, FetchError>;
}

#[async_trait]
impl FeedSource for HttpFetcher {
    async fn fetch_all(
        &self,
        run_id: Uuid,
        feeds: &[FeedDescriptor],
    ) -> Result<Vec<FetchedFeed>, FetchError> {
        HttpFetcher::fetch_all(self, run_id, feeds).await
    }
}
