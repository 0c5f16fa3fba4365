use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defs::{DiscoveredItem, ProcessingRecord};

/// Prefix of every run key; the full key is `ingest-<link>`.
pub const IDEMPOTENCY_PREFIX: &str = "ingest-";

pub fn idempotency_key(link: &str) -> String {
    format!("{IDEMPOTENCY_PREFIX}{link}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Record,
    Fetch,
    Summarize,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Record, Stage::Fetch, Stage::Summarize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Record => "record",
            Stage::Fetch => "fetch",
            Stage::Summarize => "summarize",
        }
    }

    /// State reached once this stage completes.
    pub fn completed_state(&self) -> RunState {
        match self {
            Stage::Record => RunState::Recorded,
            Stage::Fetch => RunState::Fetched,
            Stage::Summarize => RunState::Summarized,
        }
    }

    /// State a run is in while this stage is pending.
    pub fn pending_state(&self) -> RunState {
        match self {
            Stage::Record => RunState::Started,
            Stage::Fetch => RunState::Recorded,
            Stage::Summarize => RunState::Fetched,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward-only run states. `Failed` remembers which stage exhausted its budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Started,
    Recorded,
    Fetched,
    Summarized,
    Failed(Stage),
}

impl RunState {
    /// The stage to execute next, if any.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            RunState::Started => Some(Stage::Record),
            RunState::Recorded => Some(Stage::Fetch),
            RunState::Fetched => Some(Stage::Summarize),
            RunState::Summarized | RunState::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Summarized | RunState::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunState::Started => "started",
            RunState::Recorded => "recorded",
            RunState::Fetched => "fetched",
            RunState::Summarized => "summarized",
            RunState::Failed(_) => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempts {
    pub record: u32,
    pub fetch: u32,
    pub summarize: u32,
}

impl StageAttempts {
    pub fn get(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Record => self.record,
            Stage::Fetch => self.fetch,
            Stage::Summarize => self.summarize,
        }
    }

    fn slot(&mut self, stage: Stage) -> &mut u32 {
        match stage {
            Stage::Record => &mut self.record,
            Stage::Fetch => &mut self.fetch,
            Stage::Summarize => &mut self.summarize,
        }
    }

    /// Counts a new attempt and returns its 1-based number.
    pub fn begin(&mut self, stage: Stage) -> u32 {
        let slot = self.slot(stage);
        *slot += 1;
        *slot
    }

    pub fn reset(&mut self, stage: Stage) {
        *self.slot(stage) = 0;
    }
}

/// Durable checkpoint of one item's traversal through the stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub key: String,
    pub item: DiscoveredItem,
    pub state: RunState,
    pub current_stage: Option<Stage>,
    pub attempts: StageAttempts,
    /// Output of the Record stage, carried so later stages resume without it.
    pub record: Option<ProcessingRecord>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(item: DiscoveredItem) -> Self {
        let now = Utc::now();
        Self {
            key: idempotency_key(&item.link),
            item,
            state: RunState::Started,
            current_stage: Some(Stage::Record),
            attempts: StageAttempts::default(),
            record: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn outcome(&self) -> RunOutcome {
        match self.state {
            RunState::Summarized => RunOutcome::Succeeded,
            RunState::Failed(_) => RunOutcome::Failed,
            _ => RunOutcome::Running,
        }
    }

    pub fn complete(&mut self, stage: Stage) {
        self.state = stage.completed_state();
        self.current_stage = self.state.next_stage();
        self.touch();
    }

    pub fn fail(&mut self, stage: Stage, error: impl Into<String>) {
        self.state = RunState::Failed(stage);
        self.current_stage = Some(stage);
        self.last_error = Some(error.into());
        self.touch();
    }

    /// Puts a failed run back in front of the stage that failed, with a fresh budget.
    /// Returns false if the run was not failed.
    pub fn reopen(&mut self) -> bool {
        let RunState::Failed(stage) = self.state else {
            return false;
        };
        self.state = stage.pending_state();
        self.current_stage = Some(stage);
        self.attempts.reset(stage);
        self.touch();
        true
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
