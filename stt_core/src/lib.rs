//! Prerecorded speech-to-text against the Deepgram `listen` endpoint.

use std::env;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Content type assumed when the client never announced one.
pub const DEFAULT_MIME_TYPE: &str = "audio/wav";

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("DEEPGRAM_API_KEY is not configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed transcription response: {0}")]
    Decode(String),

    #[error("No speech detected in audio")]
    NoSpeech,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one recorded utterance. A blank transcript is reported as
    /// [`TranscriptionError::NoSpeech`].
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        mime_type: Option<&str>,
        language: &str,
    ) -> Result<String, TranscriptionError>;
}

#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.deepgram.com".to_string(),
            model: "whisper".to_string(),
        }
    }
}

impl TranscriptionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env::var("DEEPGRAM_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: env::var("STT_BASE_URL").unwrap_or(defaults.base_url),
            model: env::var("STT_MODEL").unwrap_or(defaults.model),
        }
    }
}

#[derive(Deserialize)]
struct ListenResponse {
    results: Option<ListenResults>,
}

#[derive(Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Pull the first alternative of the first channel out of a `listen` response.
pub fn parse_transcript(body: &str) -> Result<String, TranscriptionError> {
    let response: ListenResponse =
        serde_json::from_str(body).map_err(|e| TranscriptionError::Decode(e.to_string()))?;
    let transcript = response
        .results
        .and_then(|r| r.channels.into_iter().next())
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript)
        .unwrap_or_default();

    let transcript = transcript.trim();
    if transcript.is_empty() {
        return Err(TranscriptionError::NoSpeech);
    }
    Ok(transcript.to_string())
}

pub struct DeepgramClient {
    client: Client,
    config: TranscriptionConfig,
}

impl DeepgramClient {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Transcriber for DeepgramClient {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        mime_type: Option<&str>,
        language: &str,
    ) -> Result<String, TranscriptionError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(TranscriptionError::MissingApiKey)?;

        let url = format!("{}/v1/listen", self.config.base_url.trim_end_matches('/'));
        debug!("Transcribing {} bytes ({:?}, {})", audio.len(), mime_type, language);

        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Token {api_key}"))
            .header(header::CONTENT_TYPE, mime_type.unwrap_or(DEFAULT_MIME_TYPE))
            .query(&[
                ("model", self.config.model.as_str()),
                ("language", language),
                ("filler_words", "false"),
                ("punctuate", "true"),
            ])
            .body(audio)
            .send()
            .await
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TranscriptionError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(TranscriptionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_transcript(&body)
    }
}
