//! Text generation against an Ollama-compatible `/api/generate` endpoint.

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use interfaces::traits::{TextChunkStream, TextGenerator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::fetcher::ensure_ok;
use crate::types::{PipelineError, Result};

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One NDJSON line of a streamed generate response.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

pub struct OllamaGenerator {
    client: Client,
    endpoint: Url,
    model: String,
}

impl OllamaGenerator {
    pub fn new(client: Client, host: &str, model: impl Into<String>) -> Result<Self> {
        let endpoint = Url::parse(host)?.join("/api/generate")?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn start(&self, prompt: &str) -> Result<TextChunkStream> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };
        debug!("Requesting generation from {} with model {}", self.endpoint, self.model);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;
        ensure_ok(response.status(), self.endpoint.as_str())?;

        Ok(decode_ndjson(response.bytes_stream()).boxed())
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<TextChunkStream> {
        Ok(self.start(prompt).await?)
    }
}

/// Splits a byte stream into NDJSON lines and yields each line's `response` text.
///
/// An `error` field in any line ends the stream with a generation error.
pub fn decode_ndjson<S, B, E>(bytes: S) -> impl Stream<Item = anyhow::Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    stream! {
        let mut bytes = Box::pin(bytes);
        let mut buf: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => buf.extend_from_slice(chunk.as_ref()),
                Err(e) => {
                    yield Err(anyhow::Error::from(e));
                    return;
                }
            }
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                match parse_line(&line) {
                    Ok(Some(text)) => {
                        yield Ok(text);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                }
            }
        }

        match parse_line(&buf) {
            Ok(Some(text)) => {
                yield Ok(text);
            }
            Ok(None) => {}
            Err(e) => {
                yield Err(e.into());
            }
        }
    }
}

fn parse_line(line: &[u8]) -> Result<Option<String>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let chunk: GenerateChunk = serde_json::from_slice(line)?;
    if let Some(message) = chunk.error {
        return Err(PipelineError::Generation(message));
    }
    if chunk.response.is_empty() {
        return Ok(None);
    }
    Ok(Some(chunk.response))
}
