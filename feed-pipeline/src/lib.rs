pub mod blob_store;
pub mod config;
pub mod dedup;
pub mod extractor;
pub mod fetcher;
pub mod llm_adapter;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod record_store;
pub mod scheduler;
pub mod sources;
pub mod stages;
pub mod state;
pub mod types;

pub use blob_store::{FsBlobStore, MemoryBlobStore};
pub use config::{Config, LogFormat};
pub use dedup::{DedupCache, MemoryKeyValueStore};
pub use extractor::{extract_or_strip, extract_readable_text, strip_to_plain_text};
pub use fetcher::{Fetcher, HttpPageFetcher};
pub use llm_adapter::OllamaGenerator;
pub use orchestrator::{Admission, Orchestrator, OrchestratorBuilder};
pub use parser::FeedParser;
pub use prompt::build_summary_prompt;
pub use record_store::{MemoryRecordStore, PgRecordStore};
pub use scheduler::{CycleReport, FeedScheduler};
pub use sources::{load_feed_list, HttpFeedTransport};
pub use stages::{FetchStage, PipelineStage, RecordStage, SummarizeStage};
pub use state::{MemoryRunStore, PgRunStore};
pub use types::*;
