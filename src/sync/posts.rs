use tokio_util::sync::CancellationToken;

use super::Synchronizer;
use crate::db::DocumentKind;
use crate::error::{AppError, Result};
use crate::models::{Post, SyncCursor};

/// Cache key of the persisted crawl position.
pub const CURSOR_KEY: &str = "post_cursor.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub start_cursor: u32,
    pub end_cursor: u32,
    /// Post fetches issued, including the ones that failed.
    pub fetched: u32,
    /// Chart submissions written to the store.
    pub stored: u32,
    /// First id the crawl did not get past.
    pub stopped_at: u32,
    pub cancelled: bool,
}

impl Synchronizer {
    /// Walk post ids upwards from the cursor until `gap_limit` consecutive ids
    /// fail to resolve.
    ///
    /// The cursor is persisted after every post that resolved, before the next
    /// id is requested. Cancellation ends the crawl early but is not an error,
    /// and so does a failed store write, which leaves `stopped_at` on the post
    /// that the next crawl starts from.
    pub async fn crawl(&self, cancel: &CancellationToken) -> Result<CrawlReport> {
        let mut cursor = self.load_cursor().await.map_err(|e| {
            tracing::error!("failed to load post cursor: {}", e);
            e
        })?;

        let start = cursor.last_confirmed_post_id;
        let mut report = CrawlReport {
            start_cursor: start,
            end_cursor: start,
            ..Default::default()
        };
        let mut current = start.saturating_add(1);

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            report.fetched += 1;
            match self
                .retry
                .run(cancel, || self.catalog.fetch_post(current))
                .await
            {
                Ok(post) => {
                    match self.store_post(current, &post).await {
                        Ok(true) => report.stored += 1,
                        Ok(false) => {}
                        Err(e) => {
                            // The cursor must not pass a post that is not stored.
                            tracing::error!(
                                "failed to store post {}, ending crawl before it: {}",
                                current,
                                e
                            );
                            break;
                        }
                    }
                    cursor.advance(current);
                    if let Err(e) = self.save_cursor(&cursor).await {
                        tracing::error!("failed to persist post cursor at {}: {}", current, e);
                    }
                }
                Err(e) if e.is_cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    if e.is_not_found() {
                        tracing::debug!("post {} does not exist", current);
                    } else {
                        self.quarantine_if_malformed(DocumentKind::Post, &current.to_string(), &e)
                            .await;
                        tracing::warn!("failed to get post {}: {}", current, e);
                    }
                    if current + 1 - cursor.last_confirmed_post_id > self.gap_limit {
                        current += 1;
                        tracing::info!(
                            "post crawl stopped after {} consecutive missing posts",
                            self.gap_limit
                        );
                        break;
                    }
                }
            }
            current += 1;
        }

        report.end_cursor = cursor.last_confirmed_post_id;
        report.stopped_at = current;
        Ok(report)
    }

    /// `Ok(false)` when upstream does not know the post. Non-chart posts are
    /// fetched but not stored.
    pub async fn sync_post_by_id(&self, id: u32, cancel: &CancellationToken) -> Result<bool> {
        match self.retry.run(cancel, || self.catalog.fetch_post(id)).await {
            Ok(post) => {
                self.store_post(id, &post).await?;
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => {
                self.quarantine_if_malformed(DocumentKind::Post, &id.to_string(), &e)
                    .await;
                Err(e)
            }
        }
    }

    /// Stored cursor, or one bootstrapped from the highest stored post id.
    pub async fn load_cursor(&self) -> Result<SyncCursor> {
        match self.cache.get(CURSOR_KEY).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| AppError::MalformedDocument {
                what: "post cursor".to_string(),
                source,
                body: String::from_utf8_lossy(&raw).into_owned(),
            }),
            Err(e) if e.is_not_found() => {
                let highest = match self.store.highest_post_id().await {
                    Ok(id) => id.unwrap_or(0),
                    Err(e) => {
                        tracing::warn!("failed to read highest stored post id: {}", e);
                        0
                    }
                };
                tracing::info!("no post cursor yet, starting after post {}", highest);
                Ok(SyncCursor::new(highest))
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let raw = serde_json::to_vec(cursor)?;
        self.cache.put(CURSOR_KEY, &raw).await
    }

    /// Upsert chart submissions. Returns whether the post was stored.
    pub(crate) async fn store_post(&self, id: u32, post: &Post) -> Result<bool> {
        if !post.is_chart_submission() {
            tracing::debug!("post {} is not a chart, skipping", id);
            return Ok(false);
        }
        self.store.upsert_post(id, post).await?;
        tracing::info!("updated post {}", id);
        Ok(true)
    }
}
