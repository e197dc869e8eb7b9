//! Scripted catalog used by the synchronizer tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{RetryPolicy, Synchronizer, CURSOR_KEY};
use crate::assets::{AssetCache, BlobStore, FileBlobStore};
use crate::catalog::CatalogClient;
use crate::db::{DocumentKind, PostQuery, RecordStore, Repository, SongQuery};
use crate::error::{AppError, Result};
use crate::models::{
    Chart, ChartId, DifficultyLabel, Post, PostOrder, PostPage, PostPageEntry, SongDetail,
    SongSummary, SyncCursor,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Call {
    Summary,
    Song(u32),
    Chart(u32, DifficultyLabel),
    Post(u32),
    Page(u32),
    Jacket(String),
    Bgm(u32),
}

#[derive(Default)]
pub(crate) struct FakeCatalog {
    pub summary: Mutex<BTreeMap<String, SongSummary>>,
    pub songs: Mutex<HashMap<u32, SongDetail>>,
    pub charts: Mutex<HashMap<ChartId, Chart>>,
    pub posts: Mutex<BTreeMap<u32, Post>>,
    /// Errors handed out, in order, before falling back to the scripted data.
    pub errors: Mutex<HashMap<Call, VecDeque<AppError>>>,
    pub calls: Mutex<Vec<Call>>,
    /// Cancel this token as soon as the given call is made.
    pub cancel_on: Mutex<Option<(Call, CancellationToken)>>,
    /// When set, every post fetch records the cursor persisted at that moment.
    pub cursor_probe: Mutex<Option<Arc<AssetCache>>>,
    pub cursor_seen: Mutex<Vec<(u32, Option<u32>)>>,
}

impl FakeCatalog {
    pub fn add_song(&self, id: u32, detail: SongDetail) {
        self.summary
            .lock()
            .unwrap()
            .insert(id.to_string(), detail.summary.clone());
        self.songs.lock().unwrap().insert(id, detail);
    }

    pub fn add_chart(&self, song_id: u32, difficulty: DifficultyLabel) {
        self.charts
            .lock()
            .unwrap()
            .insert(ChartId::new(song_id, difficulty), Chart::default());
    }

    pub fn add_post(&self, id: u32, post: Post) {
        self.posts.lock().unwrap().insert(id, post);
    }

    pub fn fail(&self, call: Call, error: AppError) {
        self.errors
            .lock()
            .unwrap()
            .entry(call)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    async fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call.clone());

        if let Call::Post(id) = call {
            let probe = self.cursor_probe.lock().unwrap().clone();
            if let Some(cache) = probe {
                let seen = match cache.get(CURSOR_KEY).await {
                    Ok(raw) => serde_json::from_slice::<SyncCursor>(&raw)
                        .ok()
                        .map(|c| c.last_confirmed_post_id),
                    Err(_) => None,
                };
                self.cursor_seen.lock().unwrap().push((id, seen));
            }
        }

        if let Some((trigger, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if *trigger == call {
                token.cancel();
            }
        }

        let queued = self
            .errors
            .lock()
            .unwrap()
            .get_mut(&call)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) fn transient(url: &str) -> AppError {
    AppError::TransientUpstream {
        status: 503,
        url: url.to_string(),
    }
}

pub(crate) fn malformed(what: &str, body: &str) -> AppError {
    let source = serde_json::from_str::<serde_json::Value>(body).expect_err("body must not parse");
    AppError::MalformedDocument {
        what: what.to_string(),
        source,
        body: body.to_string(),
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn fetch_catalog_summary(&self) -> Result<BTreeMap<String, SongSummary>> {
        self.record(Call::Summary).await?;
        Ok(self.summary.lock().unwrap().clone())
    }

    async fn fetch_song_detail(&self, id: u32) -> Result<SongDetail> {
        self.record(Call::Song(id)).await?;
        self.songs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("song {}", id)))
    }

    async fn fetch_chart(&self, id: u32, difficulty: DifficultyLabel) -> Result<Chart> {
        self.record(Call::Chart(id, difficulty)).await?;
        self.charts
            .lock()
            .unwrap()
            .get(&ChartId::new(id, difficulty))
            .cloned()
            .ok_or_else(|| AppError::NotExist(format!("chart {}-{}", id, difficulty)))
    }

    async fn fetch_post(&self, id: u32) -> Result<Post> {
        self.record(Call::Post(id)).await?;
        self.posts
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("post {}", id)))
    }

    async fn fetch_post_page(&self, offset: u32, limit: u32, order: PostOrder) -> Result<PostPage> {
        self.record(Call::Page(offset)).await?;
        let posts = self.posts.lock().unwrap();
        let mut ids: Vec<u32> = posts
            .iter()
            .filter(|(_, post)| post.is_chart_submission())
            .map(|(id, _)| *id)
            .collect();
        if order == PostOrder::TimeDesc {
            ids.reverse();
        }
        Ok(PostPage {
            count: ids.len() as u64,
            posts: ids
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|id| PostPageEntry {
                    id,
                    extra: Default::default(),
                })
                .collect(),
        })
    }

    async fn fetch_jacket(&self, _song_id: u32, _song: &SongDetail, image: &str) -> Result<Vec<u8>> {
        self.record(Call::Jacket(image.to_string())).await?;
        Ok(format!("jacket:{}", image).into_bytes())
    }

    async fn fetch_bgm(&self, song_id: u32, _song: &SongDetail) -> Result<Vec<u8>> {
        self.record(Call::Bgm(song_id)).await?;
        Ok(format!("bgm:{}", song_id).into_bytes())
    }
}

/// Switches that make the harness stores fail their writes.
#[derive(Clone, Default)]
pub(crate) struct Faults {
    pub post_writes: Arc<AtomicBool>,
    pub cache_writes: Arc<AtomicBool>,
}

fn injected(what: &str) -> AppError {
    AppError::Io(std::io::Error::other(format!("injected {} failure", what)))
}

/// [`Repository`] whose post upserts fail while `Faults::post_writes` is set.
pub(crate) struct FaultyStore {
    inner: Arc<Repository>,
    faults: Faults,
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn upsert_song(&self, id: u32, song: &SongDetail) -> Result<()> {
        self.inner.upsert_song(id, song).await
    }

    async fn get_song_by_id(&self, id: u32) -> Result<Option<SongDetail>> {
        self.inner.get_song_by_id(id).await
    }

    async fn delete_song(&self, id: u32) -> Result<()> {
        self.inner.delete_song(id).await
    }

    async fn upsert_chart(&self, id: ChartId, chart: &Chart) -> Result<()> {
        self.inner.upsert_chart(id, chart).await
    }

    async fn get_chart_by_id(&self, id: ChartId) -> Result<Option<Chart>> {
        self.inner.get_chart_by_id(id).await
    }

    async fn upsert_post(&self, id: u32, post: &Post) -> Result<()> {
        if self.faults.post_writes.load(Ordering::SeqCst) {
            return Err(injected("post write"));
        }
        self.inner.upsert_post(id, post).await
    }

    async fn get_post_by_id(&self, id: u32) -> Result<Option<Post>> {
        self.inner.get_post_by_id(id).await
    }

    async fn delete_post(&self, id: u32) -> Result<()> {
        self.inner.delete_post(id).await
    }

    async fn highest_post_id(&self) -> Result<Option<u32>> {
        self.inner.highest_post_id().await
    }

    async fn search_songs(&self, query: &SongQuery) -> Result<Vec<(u32, SongDetail)>> {
        self.inner.search_songs(query).await
    }

    async fn search_posts(&self, query: &PostQuery) -> Result<Vec<(u32, Post)>> {
        self.inner.search_posts(query).await
    }

    async fn quarantine(&self, kind: DocumentKind, record_id: &str, body: &str, reason: &str) -> Result<()> {
        self.inner.quarantine(kind, record_id, body, reason).await
    }
}

/// Files on disk whose writes fail while `Faults::cache_writes` is set.
pub(crate) struct FaultyBlobs {
    inner: FileBlobStore,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl BlobStore for FaultyBlobs {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read(name).await
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(injected("blob write"));
        }
        self.inner.write(name, data).await
    }
}

pub(crate) struct Harness {
    pub catalog: Arc<FakeCatalog>,
    pub store: Arc<Repository>,
    pub assets: Arc<AssetCache>,
    pub cache: Arc<AssetCache>,
    pub sync: Synchronizer,
    pub faults: Faults,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(FakeCatalog::default());
        let store = Arc::new(Repository::in_memory().await.unwrap());
        let assets = Arc::new(AssetCache::on_disk(dir.path().join("assets")));
        let faults = Faults::default();
        let cache = Arc::new(AssetCache::new(FaultyBlobs {
            inner: FileBlobStore::new(&dir.path().join("cache")),
            fail: faults.cache_writes.clone(),
        }));
        let faulty_store = Arc::new(FaultyStore {
            inner: store.clone(),
            faults: faults.clone(),
        });
        let sync = Synchronizer::new(catalog.clone(), faulty_store, assets.clone(), cache.clone())
            .with_retry(RetryPolicy::new(3, Duration::ZERO))
            .with_page_pause(Duration::ZERO);
        Self {
            catalog,
            store,
            assets,
            cache,
            sync,
            faults,
            _dir: dir,
        }
    }

    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.sync = self.sync.with_gap_limit(gap_limit);
        self
    }

    pub async fn write_cursor(&self, id: u32) {
        let raw = serde_json::to_vec(&SyncCursor::new(id)).unwrap();
        self.cache.put(CURSOR_KEY, &raw).await.unwrap();
    }

    pub async fn read_cursor(&self) -> Option<u32> {
        let raw = self.cache.get(CURSOR_KEY).await.ok()?;
        serde_json::from_slice::<SyncCursor>(&raw)
            .ok()
            .map(|c| c.last_confirmed_post_id)
    }
}

pub(crate) fn chart_post(title: &str) -> Post {
    Post {
        category_name: Some("SELF_POST".into()),
        category_id: Some("chart".into()),
        title: Some(title.into()),
        ..Default::default()
    }
}
