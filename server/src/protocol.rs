//! JSON messages exchanged with the client over `/ws`.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::PipelineError;

/// Events sent to the client, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Transcript { transcript: String },
    /// Full response text accumulated so far.
    TextProgress { text: String },
    TextComplete { text: String },
    /// Base64 encoded audio for one sentence.
    AudioChunk { index: u64, chunk: String },
    Error { error: String },
}

impl ServerEvent {
    pub fn error(err: &PipelineError) -> Self {
        ServerEvent::Error {
            error: err.to_string(),
        }
    }
}

/// Outbound half of a session; the socket writer owns the receiver.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Control messages from the client. Recorded audio arrives as binary
/// frames and is not represented here.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "audio-mime")]
    AudioMime {
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(default)]
        language: Option<String>,
    },
    #[serde(rename = "text")]
    Text {
        prompt: String,
        #[serde(default)]
        language: Option<String>,
    },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(text).map_err(|e| PipelineError::Protocol(format!("unrecognised message: {e}")))
    }
}
