use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use interfaces::traits::{Claim, RunStore};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::{DiscoveredItem, PipelineRun, Result};

/// Run checkpoints in the `pipeline_runs` table, one JSONB document per key.
#[derive(Clone)]
pub struct PgRunStore {
    db: PgPool,
}

impl PgRunStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn claim_run(&self, item: &DiscoveredItem) -> Result<Claim> {
        let fresh = PipelineRun::new(item.clone());

        let inserted = sqlx::query(
            r#"
            INSERT INTO pipeline_runs (key, link, state, run, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(&fresh.key)
        .bind(&fresh.item.link)
        .bind(fresh.state.label())
        .bind(Json(&fresh))
        .bind(fresh.created_at)
        .fetch_optional(&self.db)
        .await?;

        if inserted.is_some() {
            return Ok(Claim::New(fresh));
        }

        let mut tx = self.db.begin().await?;
        let row = sqlx::query("SELECT run FROM pipeline_runs WHERE key = $1 FOR UPDATE")
            .bind(&fresh.key)
            .fetch_one(&mut *tx)
            .await?;
        let Json(mut existing): Json<PipelineRun> = row.try_get("run")?;

        if !existing.reopen() {
            tx.commit().await?;
            debug!("Run {} already exists in state {}", existing.key, existing.state.label());
            return Ok(Claim::Duplicate(existing));
        }

        sqlx::query("UPDATE pipeline_runs SET state = $2, run = $3, updated_at = $4 WHERE key = $1")
            .bind(&existing.key)
            .bind(existing.state.label())
            .bind(Json(&existing))
            .bind(existing.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Claim::Reopened(existing))
    }

    pub async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (key, link, state, run, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO UPDATE
            SET state = EXCLUDED.state, run = EXCLUDED.run, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&run.key)
        .bind(&run.item.link)
        .bind(run.state.label())
        .bind(Json(run))
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn load_run(&self, key: &str) -> Result<Option<PipelineRun>> {
        let row = sqlx::query("SELECT run FROM pipeline_runs WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => {
                let Json(run): Json<PipelineRun> = row.try_get("run")?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    pub async fn unfinished_runs(&self) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            "SELECT run FROM pipeline_runs WHERE state NOT IN ('summarized', 'failed') ORDER BY created_at",
        )
        .fetch_all(&self.db)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let Json(run): Json<PipelineRun> = row.try_get("run")?;
            runs.push(run);
        }
        Ok(runs)
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn claim(&self, item: &DiscoveredItem) -> anyhow::Result<Claim> {
        Ok(self.claim_run(item).await?)
    }

    async fn save(&self, run: &PipelineRun) -> anyhow::Result<()> {
        Ok(self.save_run(run).await?)
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<PipelineRun>> {
        Ok(self.load_run(key).await?)
    }

    async fn list_unfinished(&self) -> anyhow::Result<Vec<PipelineRun>> {
        Ok(self.unfinished_runs().await?)
    }
}

/// Run checkpoints kept in process memory. Lost on restart.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, PipelineRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn claim(&self, item: &DiscoveredItem) -> anyhow::Result<Claim> {
        let fresh = PipelineRun::new(item.clone());
        let mut runs = self.runs.lock().await;
        match runs.entry(fresh.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh.clone());
                Ok(Claim::New(fresh))
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.reopen() {
                    Ok(Claim::Reopened(existing.clone()))
                } else {
                    Ok(Claim::Duplicate(existing.clone()))
                }
            }
        }
    }

    async fn save(&self, run: &PipelineRun) -> anyhow::Result<()> {
        self.runs.lock().await.insert(run.key.clone(), run.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<PipelineRun>> {
        Ok(self.runs.lock().await.get(key).cloned())
    }

    async fn list_unfinished(&self) -> anyhow::Result<Vec<PipelineRun>> {
        let runs = self.runs.lock().await;
        let mut unfinished: Vec<_> = runs
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        unfinished.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(unfinished)
    }
}
