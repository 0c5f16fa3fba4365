use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use interfaces::traits::{BlobStore, DocumentStore, PageFetcher, TextGenerator};
use tracing::{debug, info};

use crate::extractor::extract_or_strip;
use crate::prompt::build_summary_prompt;
use crate::types::{
    DiscoveredItem, InsertOutcome, NewRecord, PipelineError, ProcessingRecord, RecordField, Result,
    Stage,
};

/// One idempotent unit of pipeline work. Running it twice on the same input
/// must leave the same observable state as running it once.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn stage(&self) -> Stage;

    async fn run(&self, input: &Self::Input) -> Result<Self::Output>;
}

/// Persists the discovered item as a processing record.
pub struct RecordStage {
    documents: Arc<dyn DocumentStore>,
}

impl RecordStage {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl PipelineStage for RecordStage {
    type Input = DiscoveredItem;
    type Output = ProcessingRecord;

    fn stage(&self) -> Stage {
        Stage::Record
    }

    async fn run(&self, item: &DiscoveredItem) -> Result<ProcessingRecord> {
        match self
            .documents
            .insert_unique(NewRecord::from(item))
            .await
            .map_err(PipelineError::from_collaborator)?
        {
            InsertOutcome::Inserted(record) => {
                info!("Recorded {} as {}", record.link, record.id);
                Ok(record)
            }
            InsertOutcome::AlreadyExists(id) => {
                // Typically a retry after the first insert's response was lost.
                info!("Record for {} already exists as {}, continuing with it", item.link, id);
                self.documents
                    .find_by_id(id)
                    .await
                    .map_err(PipelineError::from_collaborator)?
                    .ok_or(PipelineError::RecordNotFound { id })
            }
        }
    }
}

/// Downloads the article page and stores the raw body under the record id.
pub struct FetchStage {
    pages: Arc<dyn PageFetcher>,
    blobs: Arc<dyn BlobStore>,
}

impl FetchStage {
    pub fn new(pages: Arc<dyn PageFetcher>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { pages, blobs }
    }
}

#[async_trait]
impl PipelineStage for FetchStage {
    type Input = ProcessingRecord;
    /// Number of bytes stored.
    type Output = usize;

    fn stage(&self) -> Stage {
        Stage::Fetch
    }

    async fn run(&self, record: &ProcessingRecord) -> Result<usize> {
        let body = self
            .pages
            .fetch(&record.link)
            .await
            .map_err(PipelineError::from_collaborator)?;
        self.blobs
            .write(record.id, &body)
            .await
            .map_err(PipelineError::from_collaborator)?;
        info!("Stored page for {} ({} bytes)", record.id, body.len());
        Ok(body.len())
    }
}

/// Extracts prose from the stored page, generates a summary and saves it.
pub struct SummarizeStage {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    generator: Arc<dyn TextGenerator>,
}

impl SummarizeStage {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            documents,
            blobs,
            generator,
        }
    }
}

#[async_trait]
impl PipelineStage for SummarizeStage {
    type Input = ProcessingRecord;
    type Output = String;

    fn stage(&self) -> Stage {
        Stage::Summarize
    }

    async fn run(&self, record: &ProcessingRecord) -> Result<String> {
        let markup = self
            .blobs
            .read(record.id)
            .await
            .map_err(PipelineError::from_collaborator)?;
        let text = extract_or_strip(&markup);
        debug!("Extracted {} chars for {}", text.chars().count(), record.id);

        let prompt = build_summary_prompt(&record.title, &record.link, &text);
        let mut chunks = self
            .generator
            .generate(&prompt)
            .await
            .map_err(PipelineError::from_collaborator)?;
        let mut summary = String::new();
        while let Some(chunk) = chunks.next().await {
            summary.push_str(&chunk.map_err(PipelineError::from_collaborator)?);
        }

        self.documents
            .update_field(record.id, RecordField::Summary(summary.clone()))
            .await
            .map_err(PipelineError::from_collaborator)?;
        info!("Saved summary for {} ({} chars)", record.link, summary.chars().count());
        Ok(summary)
    }
}
