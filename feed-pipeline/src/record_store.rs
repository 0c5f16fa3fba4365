use std::collections::HashMap;

use async_trait::async_trait;
use interfaces::traits::DocumentStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{InsertOutcome, NewRecord, PipelineError, ProcessingRecord, RecordField, Result};

/// Embedded schema for records and run checkpoints.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Opens a pool and brings the schema up to date.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    MIGRATOR.run(&db).await?;
    info!("Database schema is up to date");
    Ok(db)
}

/// Processing records in PostgreSQL with a unique index on `link`.
#[derive(Clone)]
pub struct PgRecordStore {
    db: PgPool,
}

impl PgRecordStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, record: NewRecord) -> Result<InsertOutcome> {
        let id = Uuid::new_v4();

        // DO NOTHING keeps the duplicate case out of the error path.
        let inserted = sqlx::query(
            r#"
            INSERT INTO processing_records (id, link, title, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (link) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&record.link)
        .bind(&record.title)
        .bind(record.created_at)
        .fetch_optional(&self.db)
        .await?;

        if inserted.is_some() {
            debug!("Inserted record {} for {}", id, record.link);
            return Ok(InsertOutcome::Inserted(ProcessingRecord {
                id,
                link: record.link,
                title: record.title,
                summary: None,
                created_at: record.created_at,
            }));
        }

        let existing = sqlx::query("SELECT id FROM processing_records WHERE link = $1")
            .bind(&record.link)
            .fetch_one(&self.db)
            .await?;
        let existing_id: Uuid = existing.try_get("id")?;
        debug!("Record for {} already exists as {}", record.link, existing_id);
        Ok(InsertOutcome::AlreadyExists(existing_id))
    }

    pub async fn update(&self, id: Uuid, field: RecordField) -> Result<()> {
        let result = match field {
            RecordField::Summary(summary) => {
                sqlx::query("UPDATE processing_records SET summary = $1 WHERE id = $2")
                    .bind(summary)
                    .bind(id)
                    .execute(&self.db)
                    .await?
            }
        };
        if result.rows_affected() == 0 {
            return Err(PipelineError::RecordNotFound { id });
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ProcessingRecord>> {
        let row = sqlx::query(
            "SELECT id, link, title, summary, created_at FROM processing_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    pub async fn get_by_link(&self, link: &str) -> Result<Option<ProcessingRecord>> {
        let row = sqlx::query(
            "SELECT id, link, title, summary, created_at FROM processing_records WHERE link = $1",
        )
        .bind(link)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<ProcessingRecord> {
    Ok(ProcessingRecord {
        id: row.try_get("id")?,
        link: row.try_get("link")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DocumentStore for PgRecordStore {
    async fn insert_unique(&self, record: NewRecord) -> anyhow::Result<InsertOutcome> {
        Ok(self.insert(record).await?)
    }

    async fn update_field(&self, id: Uuid, field: RecordField) -> anyhow::Result<()> {
        Ok(self.update(id, field).await?)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ProcessingRecord>> {
        Ok(self.get(id).await?)
    }

    async fn find_by_link(&self, link: &str) -> anyhow::Result<Option<ProcessingRecord>> {
        Ok(self.get_by_link(link).await?)
    }
}

/// Record store kept in process memory.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<Uuid, ProcessingRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<ProcessingRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }
}

#[async_trait]
impl DocumentStore for MemoryRecordStore {
    async fn insert_unique(&self, record: NewRecord) -> anyhow::Result<InsertOutcome> {
        // Single write lock makes check-and-insert atomic.
        let mut records = self.records.write().await;
        if let Some(existing) = records.values().find(|r| r.link == record.link) {
            return Ok(InsertOutcome::AlreadyExists(existing.id));
        }
        let stored = ProcessingRecord {
            id: Uuid::new_v4(),
            link: record.link,
            title: record.title,
            summary: None,
            created_at: record.created_at,
        };
        records.insert(stored.id, stored.clone());
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn update_field(&self, id: Uuid, field: RecordField) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(PipelineError::RecordNotFound { id })?;
        match field {
            RecordField::Summary(summary) => record.summary = Some(summary),
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ProcessingRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_link(&self, link: &str) -> anyhow::Result<Option<ProcessingRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.link == link)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::defs::DiscoveredItem;

    #[tokio::test]
    async fn second_insert_of_a_link_reports_existing_id() {
        let store = MemoryRecordStore::new();
        let item = DiscoveredItem::new("https://x/a", "A");

        let first = store.insert_unique(NewRecord::from(&item)).await.unwrap();
        let InsertOutcome::Inserted(record) = first else {
            panic!("expected insert, got {:?}", first);
        };
        let second = store.insert_unique(NewRecord::from(&item)).await.unwrap();
        assert_eq!(second, InsertOutcome::AlreadyExists(record.id));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn update_of_unknown_record_fails() {
        let store = MemoryRecordStore::new();
        let result = store
            .update_field(Uuid::new_v4(), RecordField::Summary("s".into()))
            .await;
        assert!(result.is_err());
    }
}
