use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured feed endpoint. Loaded once at startup, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    pub title: String,
    #[serde(rename = "xmlUrl")]
    pub source_url: String,
}

/// One entry seen in a feed document during a poll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredItem {
    pub link: String,
    pub title: String,
}

impl DiscoveredItem {
    pub fn new(link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
        }
    }
}

/// Durable per-item record. `link` is unique across the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub id: Uuid,
    pub link: String,
    pub title: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a record that does not exist yet; the store assigns the id.
#[derive(Clone, Debug)]
pub struct NewRecord {
    pub link: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl From<&DiscoveredItem> for NewRecord {
    fn from(item: &DiscoveredItem) -> Self {
        Self {
            link: item.link.clone(),
            title: item.title.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Answer of a unique insert. A duplicate link is a normal outcome, not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome {
    Inserted(ProcessingRecord),
    AlreadyExists(Uuid),
}

/// Single-field updates applied to an existing record.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordField {
    Summary(String),
}

impl RecordField {
    pub fn name(&self) -> &'static str {
        match self {
            RecordField::Summary(_) => "summary",
        }
    }
}
