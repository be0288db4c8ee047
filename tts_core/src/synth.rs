use std::env;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{format::AudioFormat, voices::VoiceMap};

const XI_API_KEY_HEADER: &str = "xi-api-key";

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Voice ID for language '{0}' is not configured")]
    MissingVoice(String),

    #[error("ELEVENLABS_API_KEY is not configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Encoded speech for one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<SynthesizedAudio, SynthesisError>;

    /// Language tags that have a voice configured.
    fn languages(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.elevenlabs.io".to_string(),
            model_id: "eleven_flash_v2_5".to_string(),
            stability: 0.5,
            similarity_boost: 0.8,
        }
    }
}

impl SpeechConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env::var("ELEVENLABS_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: env::var("ELEVENLABS_BASE_URL").unwrap_or(defaults.base_url),
            model_id: env::var("ELEVENLABS_MODEL_ID").unwrap_or(defaults.model_id),
            ..defaults
        }
    }
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// Streaming text-to-speech over HTTP; responses are MP3.
pub struct ElevenLabsClient {
    client: Client,
    config: SpeechConfig,
    voices: VoiceMap,
}

impl ElevenLabsClient {
    pub fn new(config: SpeechConfig, voices: VoiceMap) -> Self {
        Self {
            client: Client::new(),
            config,
            voices,
        }
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str, language: &str) -> Result<SynthesizedAudio, SynthesisError> {
        let voice = self
            .voices
            .voice_for(language)
            .ok_or_else(|| SynthesisError::MissingVoice(language.to_string()))?;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(SynthesisError::MissingApiKey)?;

        let url = format!(
            "{}/v1/text-to-speech/{}/stream",
            self.config.base_url.trim_end_matches('/'),
            voice.voice_id
        );
        let body = TtsRequest {
            text,
            model_id: &self.config.model_id,
            voice_settings: VoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };

        let response = self
            .client
            .post(&url)
            .header(XI_API_KEY_HEADER, api_key)
            .header(header::ACCEPT, AudioFormat::Mp3.mime_type())
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Request(e.to_string()))?;
        debug!("Synthesized {} bytes for {} chars ({})", bytes.len(), text.len(), language);

        Ok(SynthesizedAudio {
            bytes: bytes.to_vec(),
            format: AudioFormat::Mp3,
        })
    }

    fn languages(&self) -> Vec<String> {
        self.voices.languages()
    }
}
