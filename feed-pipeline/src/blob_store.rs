use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use interfaces::traits::BlobStore;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::types::{PipelineError, Result};

/// Stores fetched pages as `<dir>/<id>.html`.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.html", id))
    }

    pub async fn write_content(&self, id: Uuid, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(id);
        // Readers never observe a partially written page.
        let tmp = self.dir.join(format!("{}.html.partial", id));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }

    pub async fn read_content(&self, id: Uuid) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(PipelineError::ContentMissing { id }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, id: Uuid, bytes: &[u8]) -> anyhow::Result<()> {
        self.write_content(id, bytes).await?;
        Ok(())
    }

    async fn read(&self, id: Uuid) -> anyhow::Result<Vec<u8>> {
        Ok(self.read_content(id).await?)
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.blobs.read().await.contains_key(&id)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, id: Uuid, bytes: &[u8]) -> anyhow::Result<()> {
        self.blobs.write().await.insert(id, bytes.to_vec());
        Ok(())
    }

    async fn read(&self, id: Uuid) -> anyhow::Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PipelineError::ContentMissing { id }.into())
    }
}
