mod sse;

use std::{env, pin::Pin};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use sse::{SseDecoder, DONE_MARKER};

/// One fragment of model output, numbered in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta {
    pub index: usize,
    pub text: String,
}

impl TextDelta {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CompletionStreamError {
    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed stream payload: {0}")]
    Decode(String),

    #[error("no delta received within {0} seconds")]
    Timeout(u64),
}

/// Lazily evaluated delta sequence. Ends after the upstream completion marker;
/// an `Err` item terminates the request early.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<TextDelta, CompletionStreamError>> + Send>>;

#[async_trait]
pub trait CompletionSource: Send + Sync {
    async fn stream_completion(&self, prompt: &str) -> Result<DeltaStream, CompletionStreamError>;
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u16,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 300,
        }
    }
}

impl CompletionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: env::var("LLM_BASE_URL").unwrap_or(defaults.base_url),
            model: env::var("LLM_MODEL").unwrap_or(defaults.model),
            max_tokens: env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_tokens),
        }
    }
}

/// Structure for the OpenAI Chat API request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u16,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// One `data:` payload of the streaming response
#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// Extract the content fragment carried by one stream payload, if any.
pub fn parse_chunk(payload: &str) -> Result<Option<String>, CompletionStreamError> {
    let chunk: ChunkResponse = serde_json::from_str(payload)
        .map_err(|e| CompletionStreamError::Decode(format!("{e}: {payload}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

pub struct OpenAiClient {
    client: Client,
    config: CompletionConfig,
}

impl OpenAiClient {
    pub fn new(config: CompletionConfig) -> Self {
        info!("Completion client configured: model={}, max_tokens={}", config.model, config.max_tokens);
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl CompletionSource for OpenAiClient {
    async fn stream_completion(&self, prompt: &str) -> Result<DeltaStream, CompletionStreamError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(CompletionStreamError::MissingApiKey)?;

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let req_body = ChatRequest {
            model: &self.config.model,
            messages: vec![Message { role: "user", content: prompt }],
            max_tokens: self.config.max_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&req_body)
            .send()
            .await
            .map_err(|e| CompletionStreamError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionStreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            let mut index = 0usize;
            let mut done = false;
            while !done {
                let Some(chunk) = bytes.next().await else { break };
                let chunk = chunk.map_err(|e| CompletionStreamError::Request(e.to_string()))?;
                for payload in decoder.push(&chunk) {
                    if payload == DONE_MARKER {
                        done = true;
                        break;
                    }
                    if let Some(content) = parse_chunk(&payload)? {
                        yield TextDelta::new(index, content);
                        index += 1;
                    }
                }
            }
            debug!("Completion stream finished after {} deltas", index);
        };

        Ok(Box::pin(stream))
    }
}

/// Turn a fixed list of fragments into a [`DeltaStream`]. Used for replaying
/// canned responses.
pub fn deltas_from<I, S>(fragments: I) -> DeltaStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let items: Vec<Result<TextDelta, CompletionStreamError>> = fragments
        .into_iter()
        .enumerate()
        .map(|(i, s)| Ok(TextDelta::new(i, s)))
        .collect();
    Box::pin(tokio_stream::iter(items))
}
