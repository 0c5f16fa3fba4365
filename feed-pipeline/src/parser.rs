use std::collections::HashSet;

use feed_rs::parser;
use tracing::debug;
use url::Url;

use crate::types::{DiscoveredItem, PipelineError, Result};

/// Turns a feed document into discovered items.
pub struct FeedParser;

impl FeedParser {
    /// Parses RSS/Atom/JSON feed bytes fetched from `feed_url`.
    ///
    /// Entries without a usable link are skipped, relative links are resolved
    /// against the feed URL and repeated links keep their first occurrence.
    pub fn parse_items(content: &[u8], feed_url: &str) -> Result<Vec<DiscoveredItem>> {
        let feed = parser::parse(content)
            .map_err(|e| PipelineError::Parse(format!("Failed to parse feed {}: {}", feed_url, e)))?;
        let base = Url::parse(feed_url).ok();

        let mut seen_links = HashSet::new();
        let mut items = Vec::with_capacity(feed.entries.len());

        for entry in feed.entries {
            let Some(raw_link) = entry.links.first().map(|l| l.href.trim().to_string()) else {
                debug!("Skipping entry {} without link", entry.id);
                continue;
            };
            let Some(link) = resolve_link(base.as_ref(), &raw_link) else {
                debug!("Skipping entry with unusable link {:?}", raw_link);
                continue;
            };
            if !seen_links.insert(link.clone()) {
                debug!("Skipping duplicate entry with URL: {}", link);
                continue;
            }

            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();
            items.push(DiscoveredItem { link, title });
        }

        debug!("Parsed {} items from {}", items.len(), feed_url);
        Ok(items)
    }
}

fn resolve_link(base: Option<&Url>, raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    match Url::parse(raw) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            base.and_then(|b| b.join(raw).ok()).map(|u| u.to_string())
        }
        Err(_) => None,
    }
}
