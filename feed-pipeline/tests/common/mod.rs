// Shared fakes for the integration tests. Not every test binary uses all of them.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use feed_pipeline::{
    DiscoveredItem, InsertOutcome, MemoryBlobStore, MemoryRecordStore, MemoryRunStore,
    NewRecord, Orchestrator, PipelineRun, ProcessingRecord, RecordField, RetryPolicy,
};
use futures::stream::{self, StreamExt};
use interfaces::traits::{
    Claim, DocumentStore, FeedTransport, KeyValueStore, PageFetcher, RunStore, TextChunkStream,
    TextGenerator,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const ARTICLE_HTML: &str = "<html><body><h1>T</h1><p>Paragraph one.</p><script>bad()</script></body></html>";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Retry policy with the production budget but millisecond backoff.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        attempt_timeout: Duration::from_secs(5),
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        ..RetryPolicy::default()
    }
}

/// Page fetcher that fails a configurable number of times before serving `body`.
pub struct FlakyPages {
    body: Vec<u8>,
    failures_left: AtomicU32,
    status: u16,
    pub calls: AtomicU32,
}

impl FlakyPages {
    pub fn ok(body: &str) -> Self {
        Self::failing_then_ok(0, body)
    }

    pub fn failing_then_ok(failures: u32, body: &str) -> Self {
        Self {
            body: body.as_bytes().to_vec(),
            failures_left: AtomicU32::new(failures),
            status: 503,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always_failing(status: u16) -> Self {
        Self {
            body: Vec::new(),
            failures_left: AtomicU32::new(u32::MAX),
            status,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for FlakyPages {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("HTTP {} for {}", self.status, url);
        }
        Ok(self.body.clone())
    }
}

/// Page fetcher that never answers.
pub struct HangingPages;

#[async_trait]
impl PageFetcher for HangingPages {
    async fn fetch(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
        tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        Ok(Vec::new())
    }
}

/// Generator that streams fixed chunks and remembers every prompt.
pub struct ScriptedGenerator {
    chunks: Vec<String>,
    failures_left: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            failures_left: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(mut self, failures: u32) -> Self {
        self.failures_left = AtomicU32::new(failures);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<TextChunkStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("model backend unavailable");
        }
        let chunks: Vec<anyhow::Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(stream::iter(chunks).boxed())
    }
}

/// Document store whose first insert lands but reports a transport error,
/// as if the response had been lost.
pub struct LossyInsertStore {
    pub inner: MemoryRecordStore,
    lose_next: AtomicU32,
    pub inserts: AtomicU32,
}

impl LossyInsertStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            lose_next: AtomicU32::new(1),
            inserts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for LossyInsertStore {
    async fn insert_unique(&self, record: NewRecord) -> anyhow::Result<InsertOutcome> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.inner.insert_unique(record).await?;
        if self.lose_next.swap(0, Ordering::SeqCst) > 0 {
            anyhow::bail!("connection reset while reading insert response");
        }
        Ok(outcome)
    }

    async fn update_field(&self, id: Uuid, field: RecordField) -> anyhow::Result<()> {
        self.inner.update_field(id, field).await
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ProcessingRecord>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_link(&self, link: &str) -> anyhow::Result<Option<ProcessingRecord>> {
        self.inner.find_by_link(link).await
    }
}

/// Run store whose next `failures` checkpoint writes are rejected.
pub struct FlakySaveRuns {
    pub inner: MemoryRunStore,
    failures_left: AtomicU32,
    pub rejected: AtomicU32,
}

impl FlakySaveRuns {
    pub fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryRunStore::new(),
            failures_left: AtomicU32::new(failures),
            rejected: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RunStore for FlakySaveRuns {
    async fn claim(&self, item: &DiscoveredItem) -> anyhow::Result<Claim> {
        self.inner.claim(item).await
    }

    async fn save(&self, run: &PipelineRun) -> anyhow::Result<()> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            self.rejected.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("checkpoint table unavailable");
        }
        self.inner.save(run).await
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<PipelineRun>> {
        self.inner.load(key).await
    }

    async fn list_unfinished(&self) -> anyhow::Result<Vec<PipelineRun>> {
        self.inner.list_unfinished().await
    }
}

/// Feed transport answering from a fixed table; unknown URLs fail.
#[derive(Default)]
pub struct StaticFeeds {
    feeds: HashMap<String, Vec<DiscoveredItem>>,
    pub calls: AtomicU32,
}

impl StaticFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: &str, links: &[&str]) -> Self {
        let items = links
            .iter()
            .map(|link| DiscoveredItem::new(*link, format!("Title of {}", link)))
            .collect();
        self.feeds.insert(url.to_string(), items);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedTransport for StaticFeeds {
    async fn fetch_entries(&self, source_url: &str) -> anyhow::Result<Vec<DiscoveredItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.feeds.get(source_url) {
            Some(items) => Ok(items.clone()),
            None => anyhow::bail!("failed to parse feed {}", source_url),
        }
    }
}

/// Key/value store that is down.
pub struct UnreachableKeyValueStore;

#[async_trait]
impl KeyValueStore for UnreachableKeyValueStore {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("connection refused")
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }
}

/// In-memory collaborators wired into an orchestrator.
pub struct Harness {
    pub documents: Arc<dyn DocumentStore>,
    pub records: Option<Arc<MemoryRecordStore>>,
    pub blobs: Arc<MemoryBlobStore>,
    pub runs: Arc<MemoryRunStore>,
    pub generator: Arc<ScriptedGenerator>,
    pub orchestrator: Orchestrator,
}

pub struct HarnessBuilder {
    documents: Option<Arc<dyn DocumentStore>>,
    pages: Arc<dyn PageFetcher>,
    generator: Arc<ScriptedGenerator>,
    runs: Arc<MemoryRunStore>,
    blobs: Arc<MemoryBlobStore>,
    policy: RetryPolicy,
    token: CancellationToken,
}

impl HarnessBuilder {
    pub fn new(pages: Arc<dyn PageFetcher>) -> Self {
        Self {
            documents: None,
            pages,
            generator: Arc::new(ScriptedGenerator::new(&["A short ", "summary."])),
            runs: Arc::new(MemoryRunStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            policy: fast_policy(),
            token: CancellationToken::new(),
        }
    }

    pub fn documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn generator(mut self, generator: Arc<ScriptedGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn runs(mut self, runs: Arc<MemoryRunStore>) -> Self {
        self.runs = runs;
        self
    }

    pub fn blobs(mut self, blobs: Arc<MemoryBlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn build(self) -> Harness {
        let (documents, records): (Arc<dyn DocumentStore>, Option<Arc<MemoryRecordStore>>) =
            match self.documents {
                Some(documents) => (documents, None),
                None => {
                    let records = Arc::new(MemoryRecordStore::new());
                    let documents: Arc<dyn DocumentStore> = records.clone();
                    (documents, Some(records))
                }
            };

        let orchestrator = Orchestrator::builder()
            .documents(documents.clone())
            .blobs(self.blobs.clone())
            .pages(self.pages)
            .generator(self.generator.clone())
            .runs(self.runs.clone())
            .policy(self.policy)
            .shutdown_token(self.token)
            .build()
            .expect("all collaborators provided");

        Harness {
            documents,
            records,
            blobs: self.blobs,
            runs: self.runs,
            generator: self.generator,
            orchestrator,
        }
    }
}

impl Harness {
    pub fn records(&self) -> &MemoryRecordStore {
        self.records.as_deref().expect("harness built with the default record store")
    }
}
