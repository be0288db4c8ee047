//! One live client connection: selected language, announced upload format,
//! and the response pipeline that serves its requests one at a time.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    app::{AppState, Services},
    error::PipelineError,
    metrics::PipelineMetrics,
    pipeline::{AudioDispatcher, CoordinatorSettings, StreamCoordinator, SynthesisQueue},
    protocol::{ClientMessage, EventSender, ServerEvent},
    validation::{validate_audio_upload, validate_language, validate_prompt},
};

pub struct Session {
    id: Uuid,
    language: String,
    mime_type: Option<String>,
    events: EventSender,
    coordinator: StreamCoordinator,
    services: Services,
    metrics: Arc<PipelineMetrics>,
}

impl Session {
    pub fn open(state: &AppState, events: EventSender) -> Self {
        let id = Uuid::new_v4();
        let config = &state.config;
        let mode = config.delivery_mode;

        let dispatcher = AudioDispatcher::for_mode(
            mode,
            events.clone(),
            state.services.transcoder.clone(),
            config.relay.clone(),
        );
        let queue = SynthesisQueue::spawn(id, state.services.synthesizer.clone(), dispatcher, state.metrics.clone());
        let coordinator = StreamCoordinator::new(
            id,
            queue,
            events.clone(),
            state.metrics.clone(),
            CoordinatorSettings {
                drain_grace: config.drain_grace(),
                delta_timeout: config.llm_timeout(),
            },
        );

        state.metrics.record_session_opened();
        info!(session = %id, mode = %mode, "Session opened");

        Self {
            id,
            language: config.default_language.clone(),
            mime_type: None,
            events,
            coordinator,
            services: state.services.clone(),
            metrics: state.metrics.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Malformed or unknown control messages are logged and ignored.
    pub async fn handle_text_frame(&mut self, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(session = %self.id, "Ignoring client message: {}", e);
                return;
            }
        };

        match message {
            ClientMessage::AudioMime { mime_type, language } => {
                debug!(session = %self.id, "Next upload is {}", mime_type);
                self.mime_type = Some(mime_type);
                if let Some(language) = language {
                    self.select_language(&language);
                }
            }
            ClientMessage::Text { prompt, language } => {
                if let Some(language) = language {
                    self.select_language(&language);
                }
                self.handle_prompt(&prompt).await;
            }
        }
    }

    /// Switch language if a voice exists for it; otherwise keep the current one.
    pub fn select_language(&mut self, language: &str) {
        let available = self.services.synthesizer.languages();
        match validate_language(language, &available) {
            Ok(language) => {
                if language != self.language {
                    info!(session = %self.id, "Language set to {}", language);
                }
                self.language = language.to_string();
            }
            Err(e) => warn!(session = %self.id, "{}; keeping '{}'", e, self.language),
        }
    }

    pub async fn handle_prompt(&mut self, prompt: &str) -> Option<String> {
        match validate_prompt(prompt) {
            Ok(prompt) => {
                let prompt = prompt.to_string();
                self.respond(&prompt).await
            }
            Err(e @ PipelineError::Protocol(_)) => {
                warn!(session = %self.id, "Ignoring text message: {}", e);
                None
            }
            Err(e) => {
                self.report(&e);
                None
            }
        }
    }

    /// Transcribe a recorded utterance, echo the transcript, then answer it.
    pub async fn handle_audio(&mut self, audio: Vec<u8>) -> Option<String> {
        if let Err(e) = validate_audio_upload(&audio) {
            self.report(&e);
            return None;
        }

        debug!(session = %self.id, "Transcribing {} bytes ({:?})", audio.len(), self.mime_type);
        let transcript = match self
            .services
            .transcriber
            .transcribe(audio, self.mime_type.as_deref(), &self.language)
            .await
        {
            Ok(transcript) => transcript,
            Err(e) => {
                self.report(&PipelineError::from(e));
                return None;
            }
        };

        info!(session = %self.id, "Transcript: {:?}", transcript);
        if self
            .events
            .send(ServerEvent::Transcript {
                transcript: transcript.clone(),
            })
            .is_err()
        {
            return None;
        }
        self.respond(&transcript).await
    }

    /// Run one request through the pipeline. Failures are reported to the
    /// client and leave the session ready for the next request.
    async fn respond(&mut self, prompt: &str) -> Option<String> {
        self.metrics.record_request();
        if let Err(e) = self.coordinator.begin(&self.language) {
            self.report(&e);
            return None;
        }

        let stream = match self.services.completion.stream_completion(prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                self.coordinator.fail(&PipelineError::from(e));
                return None;
            }
        };
        self.coordinator.run(stream).await.ok()
    }

    fn report(&self, err: &PipelineError) {
        self.metrics.record_request_error();
        warn!(session = %self.id, "{}", err);
        let _ = self.events.send(ServerEvent::error(err));
    }

    /// Stop the synthesis worker; queued sentences are discarded.
    pub async fn close(mut self) {
        self.coordinator.close().await;
        info!(session = %self.id, "Session closed");
    }
}
