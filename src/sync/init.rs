use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::Synchronizer;
use crate::error::{AppError, Result};
use crate::models::{ChartId, PostOrder, SyncCursor};

const POST_PAGE_SIZE: u32 = 50;
const POST_FETCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitReport {
    pub songs: usize,
    pub charts: usize,
    pub posts: usize,
    pub failed_posts: usize,
    pub cursor: u32,
}

impl Synchronizer {
    /// Load the whole catalog into an empty mirror.
    ///
    /// Unlike a regular pass, any song or chart failure other than a missing
    /// chart aborts. Posts are listed page by page and fetched with bounded
    /// concurrency; a failing post is only logged. Ends by pointing the crawl
    /// cursor at the highest stored post.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<InitReport> {
        let mut report = InitReport::default();
        self.init_songs(cancel, &mut report).await?;
        self.init_posts(cancel, &mut report).await?;

        let highest = self.store.highest_post_id().await?.unwrap_or(0);
        self.save_cursor(&SyncCursor::new(highest)).await?;
        report.cursor = highest;

        tracing::info!(
            "initialized {} songs, {} charts, {} posts ({} failed), cursor at {}",
            report.songs,
            report.charts,
            report.posts,
            report.failed_posts,
            report.cursor
        );
        Ok(report)
    }

    async fn init_songs(&self, cancel: &CancellationToken, report: &mut InitReport) -> Result<()> {
        let catalog = self
            .retry
            .run(cancel, || self.catalog.fetch_catalog_summary())
            .await?;
        let mut ids: Vec<u32> = catalog.keys().filter_map(|key| key.parse().ok()).collect();
        ids.sort_unstable();

        for id in ids {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            tracing::info!("initializing song {}", id);

            let detail = self
                .retry
                .run(cancel, || self.catalog.fetch_song_detail(id))
                .await?;
            self.store.upsert_song(id, &detail).await?;
            report.songs += 1;

            self.sync_song_assets(id, &detail, cancel).await;

            for difficulty in detail.summary.difficulty_labels() {
                let chart = match self
                    .retry
                    .run(cancel, || self.catalog.fetch_chart(id, difficulty))
                    .await
                {
                    Ok(chart) => chart,
                    Err(AppError::NotExist(_)) => continue,
                    Err(e) => return Err(e),
                };
                self.store
                    .upsert_chart(ChartId::new(id, difficulty), &chart)
                    .await?;
                report.charts += 1;
            }
        }
        Ok(())
    }

    async fn init_posts(&self, cancel: &CancellationToken, report: &mut InitReport) -> Result<()> {
        let mut offset = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let page = self
                .retry
                .run(cancel, || {
                    self.catalog
                        .fetch_post_page(offset, POST_PAGE_SIZE, PostOrder::TimeAsc)
                })
                .await?;
            if page.posts.is_empty() {
                break;
            }
            let full_page = page.posts.len() as u32 >= POST_PAGE_SIZE;
            tracing::info!(
                "initializing posts {}..{} of {}",
                offset,
                offset as usize + page.posts.len(),
                page.count
            );

            let results: Vec<bool> = stream::iter(page.posts)
                .map(|entry| async move {
                    let id = entry.id;
                    let outcome = match self
                        .retry
                        .run(cancel, || self.catalog.fetch_post(id))
                        .await
                    {
                        Ok(post) => self.store_post(id, &post).await,
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(_) => true,
                        Err(e) => {
                            if !e.is_cancelled() {
                                tracing::error!("failed to initialize post {}: {}", id, e);
                            }
                            false
                        }
                    }
                })
                .buffer_unordered(POST_FETCH_CONCURRENCY)
                .collect()
                .await;

            let ok = results.iter().filter(|ok| **ok).count();
            report.posts += ok;
            report.failed_posts += results.len() - ok;

            if !full_page {
                break;
            }
            offset += POST_PAGE_SIZE;

            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(self.page_pause) => {}
            }
        }
        Ok(())
    }
}
