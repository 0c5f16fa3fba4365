use std::time::{Duration, Instant};

use async_trait::async_trait;
use interfaces::traits::PageFetcher;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::types::{FetchConfig, PipelineError, Result};

/// Shared HTTP client for feed documents and article pages.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// GETs `url` and returns the body. Anything but 200 is an error.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url)?;
        let start_time = Instant::now();
        debug!("Fetching {}", parsed);

        let response = self.client.get(parsed).send().await?;
        ensure_ok(response.status(), url)?;

        let body = response.bytes().await?;
        info!(
            "Fetched {} ({} bytes in {} ms)",
            url,
            body.len(),
            start_time.elapsed().as_millis()
        );
        Ok(body.to_vec())
    }
}

pub(crate) fn ensure_ok(status: StatusCode, url: &str) -> Result<()> {
    if status == StatusCode::OK {
        Ok(())
    } else {
        Err(PipelineError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

/// Article page retrieval for the fetch stage.
pub struct HttpPageFetcher {
    fetcher: Fetcher,
}

impl HttpPageFetcher {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        Ok(self.fetcher.get_bytes(url).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_200_is_accepted() {
        assert!(ensure_ok(StatusCode::OK, "https://x/a").is_ok());
        for status in [StatusCode::NO_CONTENT, StatusCode::NOT_FOUND, StatusCode::BAD_GATEWAY] {
            let err = ensure_ok(status, "https://x/a").unwrap_err();
            assert!(matches!(err, PipelineError::HttpStatus { status: s, .. } if s == status.as_u16()));
        }
    }

    #[test]
    fn client_uses_feeds_user_agent_by_default() {
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        assert_eq!(
            fetcher.config().user_agent,
            "Mozilla/5.0 (compatible; FeedsAggregator/1.0)"
        );
    }
}
