//! Contracts for everything the pipeline talks to. Implementations are
//! injected at construction time; none are looked up globally.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::defs::{DiscoveredItem, InsertOutcome, NewRecord, ProcessingRecord, RecordField};
use crate::state::PipelineRun;

/// Fetches and parses one feed document into its entries.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn fetch_entries(&self, source_url: &str) -> Result<Vec<DiscoveredItem>>;
}

/// String store with per-key expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts unless a record with the same link exists.
    async fn insert_unique(&self, record: NewRecord) -> Result<InsertOutcome>;
    async fn update_field(&self, id: Uuid, field: RecordField) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ProcessingRecord>>;
    async fn find_by_link(&self, link: &str) -> Result<Option<ProcessingRecord>>;
}

/// Raw content addressed by record id.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn write(&self, id: Uuid, bytes: &[u8]) -> Result<()>;
    async fn read(&self, id: Uuid) -> Result<Vec<u8>>;
}

/// Retrieves the body of an article page. Non-success statuses are errors.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub type TextChunkStream = BoxStream<'static, Result<String>>;

/// Model-backed text generation producing a lazy, finite stream of chunks.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<TextChunkStream>;
}

/// Result of trying to open a run for an idempotency key.
#[derive(Clone, Debug)]
pub enum Claim {
    /// No run existed; this one is now owned by the caller.
    New(PipelineRun),
    /// A failed run was reopened at the stage that failed.
    Reopened(PipelineRun),
    /// A run is in flight or already succeeded.
    Duplicate(PipelineRun),
}

/// Durable storage of run checkpoints.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Atomically opens a run for `item` unless one is live or finished.
    async fn claim(&self, item: &DiscoveredItem) -> Result<Claim>;
    async fn save(&self, run: &PipelineRun) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<PipelineRun>>;
    /// Runs that are neither summarized nor failed.
    async fn list_unfinished(&self) -> Result<Vec<PipelineRun>>;
}
