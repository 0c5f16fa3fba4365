use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use interfaces::traits::KeyValueStore;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{Result, DEFAULT_DEDUP_TTL};

const SEEN_MARKER: &str = "1";

/// Short-lived memory of admitted links, layered over a key/TTL store.
///
/// A hit means the link was admitted within the TTL. A miss proves nothing;
/// the unique index on records is what actually prevents duplicates.
#[derive(Clone)]
pub struct DedupCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl DedupCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, DEFAULT_DEDUP_TTL)
    }

    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn seen(&self, link: &str) -> Result<bool> {
        let hit = self.store.get(link).await?.is_some();
        debug!("Dedup lookup for {}: {}", link, if hit { "hit" } else { "miss" });
        Ok(hit)
    }

    /// Records the link. Failures are logged and swallowed.
    pub async fn mark_seen(&self, link: &str) {
        if let Err(e) = self.store.set(link, SEEN_MARKER, self.ttl).await {
            warn!("Failed to mark {} as seen: {}", link, e);
        }
    }
}

/// In-process key/TTL store. Expired keys are dropped lazily on access.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired entry and returns how many are left.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
                None => return Ok(None),
                Some(_) => {}
            }
        }
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }
}
