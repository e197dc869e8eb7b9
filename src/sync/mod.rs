//! Incremental synchronization of the local mirror.
//!
//! A pass refreshes stale songs first, then crawls newly published posts. The
//! [`Scheduler`] runs passes on a wall-clock cadence, one at a time.

mod detector;
mod init;
mod posts;
mod retry;
mod scheduler;
mod songs;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::assets::AssetCache;
use crate::catalog::CatalogClient;
use crate::config::ApiConfig;
use crate::db::{DocumentKind, RecordStore};
use crate::error::{AppError, Result};

pub use detector::needs_update;
pub use init::InitReport;
pub use posts::{CrawlReport, CURSOR_KEY};
pub use retry::RetryPolicy;
pub use scheduler::{ErrorLog, LaunchOutcome, PassError, Scheduler, SchedulerState};
pub use songs::SongPassReport;

/// One synchronization pass, as launched by the scheduler.
#[async_trait]
pub trait SyncPass: Send + Sync + 'static {
    async fn run_pass(&self, cancel: CancellationToken) -> Result<()>;
}

/// Owns everything a pass touches: the upstream client, the record store and
/// both blob caches.
pub struct Synchronizer {
    catalog: Arc<dyn CatalogClient>,
    store: Arc<dyn RecordStore>,
    assets: Arc<AssetCache>,
    cache: Arc<AssetCache>,
    retry: RetryPolicy,
    gap_limit: u32,
    page_pause: Duration,
}

impl Synchronizer {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        store: Arc<dyn RecordStore>,
        assets: Arc<AssetCache>,
        cache: Arc<AssetCache>,
    ) -> Self {
        let defaults = ApiConfig::default();
        Self {
            catalog,
            store,
            assets,
            cache,
            retry: RetryPolicy::from_config(&defaults),
            gap_limit: defaults.post_gap_limit,
            page_pause: Duration::from_secs(defaults.retry_delay_secs),
        }
    }

    pub fn with_api_config(mut self, config: &ApiConfig) -> Self {
        self.retry = RetryPolicy::from_config(config);
        self.gap_limit = config.post_gap_limit.max(1);
        self.page_pause = Duration::from_secs(config.retry_delay_secs);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.gap_limit = gap_limit.max(1);
        self
    }

    pub fn with_page_pause(mut self, pause: Duration) -> Self {
        self.page_pause = pause;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn assets(&self) -> &Arc<AssetCache> {
        &self.assets
    }

    /// Keep the raw body of an upstream document that failed to parse.
    /// Other errors are ignored.
    async fn quarantine_if_malformed(&self, kind: DocumentKind, record_id: &str, err: &AppError) {
        let AppError::MalformedDocument { source, body, .. } = err else {
            return;
        };
        tracing::warn!("quarantining malformed {} {}: {}", kind.as_str(), record_id, source);
        if let Err(e) = self
            .store
            .quarantine(kind, record_id, body, &source.to_string())
            .await
        {
            tracing::error!("failed to quarantine {} {}: {}", kind.as_str(), record_id, e);
        }
    }
}

#[async_trait]
impl SyncPass for Synchronizer {
    async fn run_pass(&self, cancel: CancellationToken) -> Result<()> {
        let songs = self.sync_all_songs(&cancel).await?;
        tracing::info!(
            "song pass finished: {} checked, {} updated, {} failed",
            songs.checked,
            songs.updated,
            songs.failed
        );

        let posts = self.crawl(&cancel).await?;
        tracing::info!(
            "post crawl finished: cursor {} -> {}, {} fetched, {} stored",
            posts.start_cursor,
            posts.end_cursor,
            posts.fetched,
            posts.stored
        );
        if posts.cancelled {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }
}
