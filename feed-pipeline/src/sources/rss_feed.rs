use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use interfaces::traits::FeedTransport;
use tracing::info;

use crate::fetcher::Fetcher;
use crate::parser::FeedParser;
use crate::types::{DiscoveredItem, FeedSource, Result};

/// Feed transport over HTTP: fetch the document, then parse it.
pub struct HttpFeedTransport {
    fetcher: Fetcher,
}

impl HttpFeedTransport {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    pub async fn pull(&self, source_url: &str) -> Result<Vec<DiscoveredItem>> {
        let body = self.fetcher.get_bytes(source_url).await?;
        FeedParser::parse_items(&body, source_url)
    }
}

#[async_trait]
impl FeedTransport for HttpFeedTransport {
    async fn fetch_entries(&self, source_url: &str) -> anyhow::Result<Vec<DiscoveredItem>> {
        Ok(self.pull(source_url).await?)
    }
}

/// Reads the JSON feed list: `[{"title": "...", "xmlUrl": "..."}]`.
pub async fn load_feed_list(path: impl AsRef<Path>) -> anyhow::Result<Vec<FeedSource>> {
    let path = path.as_ref();
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading feed list {}", path.display()))?;
    let sources: Vec<FeedSource> = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing feed list {}", path.display()))?;
    info!("Loaded feed list with {} sources from {}", sources.len(), path.display());
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_feed_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.json");
        tokio::fs::write(
            &path,
            r#"[{"title": "BBC", "xmlUrl": "https://feeds.bbci.co.uk/news/rss.xml"},
                {"title": "NPR", "xmlUrl": "https://feeds.npr.org/1001/rss.xml"}]"#,
        )
        .await
        .unwrap();

        let sources = load_feed_list(&path).await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "BBC");
        assert_eq!(sources[1].source_url, "https://feeds.npr.org/1001/rss.xml");
    }

    #[tokio::test]
    async fn missing_feed_list_names_the_file() {
        let err = load_feed_list("/nonexistent/feeds.json").await.unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/feeds.json"));
    }
}
