mod query;
mod repository;
mod schema;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chart, ChartId, Post, SongDetail};

pub use query::{PostQuery, Range, SongQuery};
pub use repository::{QuarantinedDocument, Repository};

/// Kind of upstream document, used to label quarantined payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Song,
    Chart,
    Post,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Song => "song",
            DocumentKind::Chart => "chart",
            DocumentKind::Post => "post",
        }
    }
}

/// Document store the synchronizers write into. Every upsert replaces the
/// whole record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn upsert_song(&self, id: u32, song: &SongDetail) -> Result<()>;

    async fn get_song_by_id(&self, id: u32) -> Result<Option<SongDetail>>;

    async fn delete_song(&self, id: u32) -> Result<()>;

    async fn upsert_chart(&self, id: ChartId, chart: &Chart) -> Result<()>;

    async fn get_chart_by_id(&self, id: ChartId) -> Result<Option<Chart>>;

    async fn upsert_post(&self, id: u32, post: &Post) -> Result<()>;

    async fn get_post_by_id(&self, id: u32) -> Result<Option<Post>>;

    async fn delete_post(&self, id: u32) -> Result<()>;

    async fn highest_post_id(&self) -> Result<Option<u32>>;

    async fn search_songs(&self, query: &SongQuery) -> Result<Vec<(u32, SongDetail)>>;

    async fn search_posts(&self, query: &PostQuery) -> Result<Vec<(u32, Post)>>;

    /// Keep an unparseable upstream payload for inspection.
    async fn quarantine(&self, kind: DocumentKind, record_id: &str, body: &str, reason: &str) -> Result<()>;
}
