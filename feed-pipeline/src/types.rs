use std::time::Duration;

use backoff::ExponentialBackoff;
use uuid::Uuid;

pub use interfaces::defs::{
    DiscoveredItem, FeedSource, InsertOutcome, NewRecord, ProcessingRecord, RecordField,
};
pub use interfaces::state::{
    idempotency_key, PipelineRun, RunOutcome, RunState, Stage, StageAttempts,
};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; FeedsAggregator/1.0)";
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_seconds: 30,
            connect_timeout_seconds: 10,
            max_redirects: 5,
        }
    }
}

/// Uniform per-stage retry budget.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5 * 60),
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(100),
        }
    }
}

impl RetryPolicy {
    /// Deterministic backoff between attempts of one stage.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Record not found: {id}")]
    RecordNotFound { id: Uuid },

    #[error("No stored content for record {id}")]
    ContentMissing { id: Uuid },

    #[error("Stage attempt timed out after {0:?}")]
    AttemptTimedOut(Duration),

    #[error("Retry budget already used up: {last_error}")]
    RetriesExhausted { last_error: String },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether another attempt of the same stage could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::InvalidUrl(_)
                | PipelineError::Config(_)
                | PipelineError::RetriesExhausted { .. }
        )
    }

    /// Unwraps a pipeline error that travelled through a collaborator's `anyhow` boundary.
    pub fn from_collaborator(error: anyhow::Error) -> Self {
        match error.downcast::<PipelineError>() {
            Ok(inner) => inner,
            Err(other) => PipelineError::Collaborator(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
