//! Two-tier blob cache: an in-memory map in front of a durable [`BlobStore`].
//!
//! Used for jacket images and audio previews downloaded during synchronization,
//! and for the small JSON cursor the post crawler persists.

mod file_store;

use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{AppError, Result};

pub use file_store::FileBlobStore;

/// Durable side of the cache.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns `None` when nothing is stored under `name`.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    async fn write(&self, name: &str, data: &[u8]) -> Result<()>;
}

pub struct AssetCache {
    store: Box<dyn BlobStore>,
    memory: RwLock<HashMap<String, Vec<u8>>>,
}

impl AssetCache {
    pub fn new(store: impl BlobStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// Cache backed by files under `root`.
    pub fn on_disk(root: impl AsRef<Path>) -> Self {
        Self::new(FileBlobStore::new(root.as_ref()))
    }

    /// Returns an owned copy of the blob, or [`AppError::NotFound`].
    pub async fn get(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;

        if let Some(data) = self.read_memory(name)? {
            return Ok(data);
        }

        match self.store.read(name).await? {
            Some(data) => {
                self.write_memory(name, data.clone())?;
                Ok(data)
            }
            None => Err(AppError::NotFound(format!("asset {}", name))),
        }
    }

    /// Durable write first; the memory tier only changes once it succeeded.
    pub async fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        validate_name(name)?;
        self.store.write(name, data).await?;
        self.write_memory(name, data.to_vec())
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        match self.get(name).await {
            Ok(_) => Ok(true),
            Err(AppError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_memory(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let memory = self
            .memory
            .read()
            .map_err(|e| anyhow::anyhow!("asset cache lock poisoned: {e}"))?;
        Ok(memory.get(name).cloned())
    }

    fn write_memory(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let mut memory = self
            .memory
            .write()
            .map_err(|e| anyhow::anyhow!("asset cache lock poisoned: {e}"))?;
        memory.insert(name.to_string(), data);
        Ok(())
    }
}

/// Asset names are relative paths that stay inside the store root.
fn validate_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    let valid = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidAssetName(name.to_string()))
    }
}

pub fn jacket_asset_name(image: &str) -> String {
    format!("musicjacket/{}.png", image)
}

pub fn bgm_asset_name(song_id: u32) -> String {
    format!("sound/bgm{:03}.mp3", song_id)
}
