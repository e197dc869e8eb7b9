//! Remote catalog access.
//!
//! [`CatalogClient`] is the seam the synchronizers talk to; [`BestdoriClient`]
//! is the HTTP implementation.

mod bestdori;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chart, DifficultyLabel, Post, PostOrder, PostPage, SongDetail, SongSummary};

pub use bestdori::BestdoriClient;

#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Every song in the catalog keyed by its (string) id.
    async fn fetch_catalog_summary(&self) -> Result<BTreeMap<String, SongSummary>>;

    async fn fetch_song_detail(&self, id: u32) -> Result<SongDetail>;

    /// `AppError::NotExist` when the difficulty has no published chart.
    async fn fetch_chart(&self, id: u32, difficulty: DifficultyLabel) -> Result<Chart>;

    /// `AppError::NotFound` when the id never resolved to a post.
    async fn fetch_post(&self, id: u32) -> Result<Post>;

    /// One page of chart submissions.
    async fn fetch_post_page(&self, offset: u32, limit: u32, order: PostOrder) -> Result<PostPage>;

    async fn fetch_jacket(&self, song_id: u32, song: &SongDetail, image: &str) -> Result<Vec<u8>>;

    async fn fetch_bgm(&self, song_id: u32, song: &SongDetail) -> Result<Vec<u8>>;
}
