use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::assets::AssetCache;
use crate::catalog::{BestdoriClient, CatalogClient};
use crate::config::Config;
use crate::db::{PostQuery, RecordStore, Repository, SongQuery};
use crate::error::Result;
use crate::models::{Chart, ChartId, DifficultyLabel, Post, SongDetail};
use crate::sync::{InitReport, PassError, Scheduler, SyncPass, Synchronizer};

/// The running mirror: store, caches, synchronizer and scheduler.
///
/// Lifecycle is `new` → optional `initialize` → `run` → `shutdown`.
pub struct App {
    store: Arc<Repository>,
    assets: Arc<AssetCache>,
    sync: Arc<Synchronizer>,
    scheduler: Scheduler,
    // Cancels on-demand work (initialize, single-record syncs) on shutdown.
    cancel: CancellationToken,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let catalog = Arc::new(BestdoriClient::new(&config.api)?);
        Self::with_catalog(config, catalog).await
    }

    pub async fn with_catalog(config: &Config, catalog: Arc<dyn CatalogClient>) -> Result<Self> {
        let store = Arc::new(Repository::new(&config.db_path()).await?);
        let assets = Arc::new(AssetCache::on_disk(config.assets_dir()));
        let cache = Arc::new(AssetCache::on_disk(config.cache_dir()));

        let sync = Arc::new(
            Synchronizer::new(catalog, store.clone(), assets.clone(), cache)
                .with_api_config(&config.api),
        );
        let scheduler = Scheduler::new(sync.clone(), config.sync.interval_minutes);

        tracing::info!("mirror opened at {}", config.data_dir.display());
        Ok(Self {
            store,
            assets,
            sync,
            scheduler,
            cancel: CancellationToken::new(),
        })
    }

    /// Bulk-load the whole catalog. Meant for an empty mirror.
    pub async fn initialize(&self) -> Result<InitReport> {
        self.sync.initialize(&self.cancel).await
    }

    /// Start the background schedule.
    pub fn run(&self) {
        self.scheduler.start();
    }

    /// Run one full pass in the foreground.
    pub async fn run_once(&self) -> Result<()> {
        self.sync.run_pass(self.cancel.clone()).await
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.scheduler.stop().await;
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn recent_errors(&self) -> Vec<PassError> {
        self.scheduler.recent_errors()
    }

    /// Refresh one song now. `Ok(false)` when upstream does not know it.
    pub async fn sync_song_by_id(&self, id: u32) -> Result<bool> {
        self.sync.sync_song_by_id(id, &self.cancel).await
    }

    /// Refresh one post now. `Ok(false)` when upstream does not know it.
    pub async fn sync_post_by_id(&self, id: u32) -> Result<bool> {
        self.sync.sync_post_by_id(id, &self.cancel).await
    }

    pub async fn song(&self, id: u32) -> Result<Option<SongDetail>> {
        self.store.get_song_by_id(id).await
    }

    pub async fn chart(&self, song_id: u32, difficulty: DifficultyLabel) -> Result<Option<Chart>> {
        self.store
            .get_chart_by_id(ChartId::new(song_id, difficulty))
            .await
    }

    pub async fn post(&self, id: u32) -> Result<Option<Post>> {
        self.store.get_post_by_id(id).await
    }

    /// Asset bytes by logical name, e.g. `musicjacket/{image}.png`.
    pub async fn asset(&self, name: &str) -> Result<Vec<u8>> {
        self.assets.get(name).await
    }

    pub async fn search_songs(&self, query: &SongQuery) -> Result<Vec<(u32, SongDetail)>> {
        self.store.search_songs(query).await
    }

    pub async fn search_posts(&self, query: &PostQuery) -> Result<Vec<(u32, Post)>> {
        self.store.search_posts(query).await
    }
}
