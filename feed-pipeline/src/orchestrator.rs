//! Saga-style driver that takes each admitted item through Record, Fetch and
//! Summarize with a per-stage retry budget and a durable checkpoint.

use std::collections::HashSet;
use std::sync::Arc;

use backoff::backoff::Backoff;
use interfaces::traits::{BlobStore, Claim, DocumentStore, PageFetcher, RunStore, TextGenerator};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::stages::{FetchStage, PipelineStage, RecordStage, SummarizeStage};
use crate::types::{
    idempotency_key, DiscoveredItem, PipelineError, PipelineRun, ProcessingRecord, Result,
    RetryPolicy, Stage,
};

/// What happened to a submitted item.
#[derive(Debug, Clone)]
pub enum Admission {
    /// A run was opened (or a failed one reopened) and is now executing.
    Started { key: String },
    /// A run for this key is already in flight or has succeeded.
    Duplicate { run: PipelineRun },
}

impl Admission {
    pub fn is_started(&self) -> bool {
        matches!(self, Admission::Started { .. })
    }
}

/// Why a run stopped short of `Summarized`.
enum Halt {
    Failed { stage: Stage, error: PipelineError },
    Interrupted,
    Checkpoint(PipelineError),
}

struct Inner {
    record: RecordStage,
    fetch: FetchStage,
    summarize: SummarizeStage,
    runs: Arc<dyn RunStore>,
    policy: RetryPolicy,
    active: Mutex<HashSet<String>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Opens a run for `item` keyed by `ingest-<link>` and starts it in the background.
    ///
    /// A key with a non-terminal checkpoint that nothing in this process is
    /// driving is picked up again instead of being reported as a duplicate.
    pub async fn admit(&self, item: DiscoveredItem) -> Result<Admission> {
        let run = match self.inner.runs.claim(&item).await? {
            Claim::New(run) => {
                info!("Admitted {} as run {}", item.link, run.key);
                run
            }
            Claim::Reopened(run) => {
                info!(
                    "Reopened failed run {} at {}",
                    run.key,
                    run.current_stage.map(|s| s.as_str()).unwrap_or("-")
                );
                run
            }
            Claim::Duplicate(run) => return self.adopt_stranded(run).await,
        };

        let key = run.key.clone();
        let claimed = run.clone();
        if self.launch(run).await {
            Ok(Admission::Started { key })
        } else {
            Ok(Admission::Duplicate { run: claimed })
        }
    }

    /// Current checkpoint for an idempotency key.
    pub async fn status(&self, key: &str) -> Result<Option<PipelineRun>> {
        Ok(self.inner.runs.load(key).await?)
    }

    pub async fn status_for_link(&self, link: &str) -> Result<Option<PipelineRun>> {
        self.status(&idempotency_key(link)).await
    }

    /// Restarts every checkpointed run that never reached a terminal state.
    pub async fn resume_unfinished(&self) -> Result<usize> {
        let pending = self.inner.runs.list_unfinished().await?;
        let mut resumed = 0;
        for run in pending {
            info!("Resuming run {} from {}", run.key, run.state.label());
            if self.launch(run).await {
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    pub async fn active_runs(&self) -> usize {
        self.inner.active.lock().await.len()
    }

    /// Waits until every run started so far has stopped.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Lets attempts in flight finish, parks runs at their next checkpoint and waits for them.
    pub async fn shutdown(&self) {
        info!("Orchestrator shutting down with {} active runs", self.active_runs().await);
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Orchestrator stopped");
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    async fn launch(&self, run: PipelineRun) -> bool {
        if !self.inner.active.lock().await.insert(run.key.clone()) {
            debug!("Run {} is already executing", run.key);
            return false;
        }
        self.spawn(run);
        true
    }

    async fn adopt_stranded(&self, seen: PipelineRun) -> Result<Admission> {
        if seen.state.is_terminal() || self.inner.shutdown.is_cancelled() {
            debug!("Run {} already exists in state {}", seen.key, seen.state.label());
            return Ok(Admission::Duplicate { run: seen });
        }

        // Runs leave the active set only after their last write, so with the
        // lock held and the key absent the stored checkpoint is current.
        let mut active = self.inner.active.lock().await;
        if active.contains(&seen.key) {
            debug!("Run {} is already executing at {}", seen.key, seen.state.label());
            return Ok(Admission::Duplicate { run: seen });
        }
        let run = match self.inner.runs.load(&seen.key).await? {
            Some(run) if !run.state.is_terminal() => run,
            Some(run) => return Ok(Admission::Duplicate { run }),
            None => return Ok(Admission::Duplicate { run: seen }),
        };
        active.insert(run.key.clone());
        drop(active);

        warn!("Run {} was left at {} with nothing driving it, restarting", run.key, run.state.label());
        let key = run.key.clone();
        self.spawn(run);
        Ok(Admission::Started { key })
    }

    /// Caller must have put the key in the active set.
    fn spawn(&self, run: PipelineRun) {
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            let key = run.key.clone();
            inner.drive(run).await;
            inner.active.lock().await.remove(&key);
        });
    }
}

impl Inner {
    async fn drive(&self, mut run: PipelineRun) -> PipelineRun {
        debug!("Driving run {} from {}", run.key, run.state.label());

        match self.advance(&mut run).await {
            Ok(()) => info!("Run {} summarized", run.key),
            Err(Halt::Failed { stage, error }) => {
                let attempts = run.attempts.get(stage);
                error!(
                    "Run for {} failed at stage {} after {} attempts: {}",
                    run.item.link, stage, attempts, error
                );
                run.fail(stage, error.to_string());
                if let Err(e) = self.runs.save(&run).await {
                    error!("Failed to persist failure of run {}: {}", run.key, e);
                }
            }
            Err(Halt::Interrupted) => {
                info!("Run {} parked at {} for shutdown", run.key, run.state.label());
            }
            Err(Halt::Checkpoint(e)) => match run.current_stage {
                Some(stage) => {
                    error!(
                        "Checkpoint writes for run {} kept failing, marking it failed at {}: {}",
                        run.key, stage, e
                    );
                    run.fail(stage, format!("checkpoint write failed: {}", e));
                    if let Err(e) = self.runs.save(&run).await {
                        error!("Failed to persist failure of run {}, a resubmission restarts it: {}", run.key, e);
                    }
                }
                None => error!("Final checkpoint for run {} failed: {}", run.key, e),
            },
        }
        run
    }

    async fn advance(&self, run: &mut PipelineRun) -> std::result::Result<(), Halt> {
        while let Some(stage) = run.state.next_stage() {
            match stage {
                Stage::Record => {
                    let item = run.item.clone();
                    let record = self.execute(run, &self.record, &item).await?;
                    run.record = Some(record);
                }
                Stage::Fetch => {
                    let record = checkpointed_record(run, stage)?;
                    self.execute(run, &self.fetch, &record).await?;
                }
                Stage::Summarize => {
                    let record = checkpointed_record(run, stage)?;
                    let summary = self.execute(run, &self.summarize, &record).await?;
                    if let Some(record) = run.record.as_mut() {
                        record.summary = Some(summary);
                    }
                }
            }
            run.complete(stage);
            self.checkpoint(run).await?;
        }
        Ok(())
    }

    /// Runs one stage under the retry policy. Attempts are strictly sequential.
    async fn execute<S: PipelineStage>(
        &self,
        run: &mut PipelineRun,
        stage: &S,
        input: &S::Input,
    ) -> std::result::Result<S::Output, Halt> {
        let kind = stage.stage();
        if run.attempts.get(kind) >= self.policy.max_attempts {
            // Budget was spent before a restart; the last attempt's outcome was never recorded.
            let last_error = run
                .last_error
                .clone()
                .unwrap_or_else(|| "no error recorded".to_string());
            return Err(Halt::Failed {
                stage: kind,
                error: PipelineError::RetriesExhausted { last_error },
            });
        }
        let mut backoff = self.policy.backoff();

        loop {
            if self.shutdown.is_cancelled() {
                return Err(Halt::Interrupted);
            }

            let attempt = run.attempts.begin(kind);
            run.current_stage = Some(kind);
            run.touch();
            self.checkpoint(run).await?;
            debug!("Starting {} attempt {} for {}", kind, attempt, run.item.link);

            let error = match timeout(self.policy.attempt_timeout, stage.run(input)).await {
                Ok(Ok(output)) => return Ok(output),
                Ok(Err(e)) => e,
                Err(_) => PipelineError::AttemptTimedOut(self.policy.attempt_timeout),
            };
            run.last_error = Some(error.to_string());

            if !error.is_retryable() || attempt >= self.policy.max_attempts {
                return Err(Halt::Failed { stage: kind, error });
            }

            let delay = backoff.next_backoff().unwrap_or(self.policy.max_interval);
            warn!(
                "Attempt {} of {} failed for {}, retrying in {:?}: {}",
                attempt, kind, run.item.link, delay, error
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(Halt::Interrupted),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Persists the run, retrying failed writes under the stage retry policy.
    async fn checkpoint(&self, run: &PipelineRun) -> std::result::Result<(), Halt> {
        let mut backoff = self.policy.backoff();
        let mut attempt = 1;
        loop {
            let error = match self.runs.save(run).await {
                Ok(()) => return Ok(()),
                Err(e) => PipelineError::from_collaborator(e),
            };
            if attempt >= self.policy.max_attempts {
                return Err(Halt::Checkpoint(error));
            }

            let delay = backoff.next_backoff().unwrap_or(self.policy.max_interval);
            warn!(
                "Checkpoint write {} for run {} failed, retrying in {:?}: {}",
                attempt, run.key, delay, error
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(Halt::Interrupted),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

fn checkpointed_record(run: &PipelineRun, stage: Stage) -> std::result::Result<ProcessingRecord, Halt> {
    run.record.clone().ok_or_else(|| Halt::Failed {
        stage,
        error: PipelineError::Collaborator(anyhow::anyhow!(
            "checkpoint for {} has no record",
            run.key
        )),
    })
}

/// Assembles an [`Orchestrator`] from explicitly provided collaborators.
#[derive(Default)]
pub struct OrchestratorBuilder {
    documents: Option<Arc<dyn DocumentStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    pages: Option<Arc<dyn PageFetcher>>,
    generator: Option<Arc<dyn TextGenerator>>,
    runs: Option<Arc<dyn RunStore>>,
    policy: RetryPolicy,
    shutdown: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn pages(mut self, pages: Arc<dyn PageFetcher>) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn runs(mut self, runs: Arc<dyn RunStore>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let documents = required(self.documents, "document store")?;
        let blobs = required(self.blobs, "blob store")?;
        let pages = required(self.pages, "page fetcher")?;
        let generator = required(self.generator, "text generator")?;
        let runs = required(self.runs, "run store")?;
        if self.policy.max_attempts == 0 {
            return Err(PipelineError::Config("max_attempts must be at least 1".to_string()));
        }

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                record: RecordStage::new(documents.clone()),
                fetch: FetchStage::new(pages, blobs.clone()),
                summarize: SummarizeStage::new(documents, blobs, generator),
                runs,
                policy: self.policy,
                active: Mutex::new(HashSet::new()),
                tracker: TaskTracker::new(),
                shutdown: self.shutdown.unwrap_or_default(),
            }),
        })
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| PipelineError::Config(format!("{} is required", what)))
}
