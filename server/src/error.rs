use llm_core::CompletionStreamError;
use stt_core::TranscriptionError;
use thiserror::Error;
use tts_core::{SynthesisError, TranscodeError};

/// Failure taxonomy of the response pipeline.
///
/// `Synthesis`, `Transcode` and `RelayDelivery` are scoped to one sentence
/// and never leave the synthesis worker. `Transcription` and
/// `CompletionStream` end the current request with an `error` event.
/// `Protocol` is per message: logged and ignored.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Audio processing failed: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("LLM stream failed: {0}")]
    CompletionStream(#[from] CompletionStreamError),

    #[error("TTS error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Transcoding error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Relay delivery failed: {0}")]
    RelayDelivery(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session closed")]
    SessionClosed,
}

impl PipelineError {
    /// Whether the failure only costs one sentence's audio.
    pub fn is_job_scoped(&self) -> bool {
        matches!(
            self,
            PipelineError::Synthesis(_) | PipelineError::Transcode(_) | PipelineError::RelayDelivery(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        PipelineError::RelayDelivery(e.to_string())
    }
}
