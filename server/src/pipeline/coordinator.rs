//! Per-session driver of the response pipeline.
//!
//! Each request walks `Idle -> Streaming -> Draining -> Closed`, or leaves
//! through `Erroring` on an upstream failure. Deltas are segmented as they
//! arrive and complete sentences are handed to the synthesis queue without
//! waiting on it. A finished request stays `Draining` until the queue has
//! delivered its last sentence; the session takes new requests meanwhile.

use std::{fmt, sync::Arc, time::Duration};

use futures_util::StreamExt;
use llm_core::{CompletionStreamError, DeltaStream, TextDelta};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::PipelineError,
    metrics::PipelineMetrics,
    pipeline::{
        queue::{SynthesisJob, SynthesisQueue},
        segmenter::{Sentence, SentenceSegmenter},
    },
    protocol::{EventSender, ServerEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Draining,
    Closed,
    Erroring,
}

impl StreamState {
    fn accepts_deltas(self) -> bool {
        matches!(self, StreamState::Idle | StreamState::Streaming)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::Streaming => "streaming",
            StreamState::Draining => "draining",
            StreamState::Closed => "closed",
            StreamState::Erroring => "erroring",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    /// How long `close` gives the sentence in flight before aborting it.
    pub drain_grace: Duration,
    /// Longest silence tolerated between two deltas.
    pub delta_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            drain_grace: Duration::from_secs(5),
            delta_timeout: Duration::from_secs(120),
        }
    }
}

pub struct StreamCoordinator {
    session_id: Uuid,
    state: StreamState,
    language: String,
    segmenter: SentenceSegmenter,
    /// Full response text of the current request.
    response: String,
    queue: SynthesisQueue,
    events: EventSender,
    metrics: Arc<PipelineMetrics>,
    settings: CoordinatorSettings,
}

impl StreamCoordinator {
    pub fn new(
        session_id: Uuid,
        queue: SynthesisQueue,
        events: EventSender,
        metrics: Arc<PipelineMetrics>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            session_id,
            state: StreamState::Idle,
            language: String::new(),
            segmenter: SentenceSegmenter::new(),
            response: String::new(),
            queue,
            events,
            metrics,
            settings,
        }
    }

    pub fn state(&self) -> StreamState {
        match self.state {
            StreamState::Draining if !self.queue.is_busy() => StreamState::Closed,
            state => state,
        }
    }

    pub fn queue(&self) -> &SynthesisQueue {
        &self.queue
    }

    /// Reset for a new request spoken in `language`.
    pub fn begin(&mut self, language: &str) -> Result<(), PipelineError> {
        if self.queue.is_closed() {
            return Err(PipelineError::SessionClosed);
        }
        match self.state() {
            StreamState::Streaming => {
                warn!(session = %self.session_id, "Starting a new request while streaming");
            }
            StreamState::Draining => debug!(
                session = %self.session_id,
                "{} sentence(s) of the previous response still queued",
                self.queue.pending()
            ),
            _ => {}
        }
        self.segmenter.reset();
        self.response.clear();
        self.language = language.to_string();
        self.state = StreamState::Idle;
        Ok(())
    }

    /// Consume one delta: accumulate, report progress, enqueue whatever
    /// sentences it completed. Returns how many were enqueued.
    pub fn ingest(&mut self, delta: &TextDelta) -> Result<usize, PipelineError> {
        if !self.state.accepts_deltas() {
            warn!(session = %self.session_id, delta = delta.index, "Dropping delta received while {}", self.state);
            return Ok(0);
        }
        self.state = StreamState::Streaming;

        self.response.push_str(&delta.text);
        self.emit(ServerEvent::TextProgress {
            text: self.response.clone(),
        })?;

        let sentences = self.segmenter.push(&delta.text);
        let count = sentences.len();
        for sentence in sentences {
            self.enqueue(sentence)?;
        }
        Ok(count)
    }

    /// Upstream finished: flush the tail and report the full text. Queued
    /// audio keeps playing after this returns.
    pub fn finish(&mut self) -> Result<String, PipelineError> {
        if !self.state.accepts_deltas() {
            return Err(PipelineError::Protocol(format!("cannot finish a {} stream", self.state)));
        }
        self.state = StreamState::Draining;

        if let Some(last) = self.segmenter.flush() {
            self.enqueue(last)?;
        }
        self.emit(ServerEvent::TextComplete {
            text: self.response.clone(),
        })?;
        info!(
            session = %self.session_id,
            "Response complete ({} chars), {} sentence(s) pending",
            self.response.len(),
            self.queue.pending()
        );
        Ok(self.response.clone())
    }

    /// Abandon the current request. Sentences already queued still play;
    /// nothing further is enqueued.
    pub fn fail(&mut self, err: &PipelineError) {
        self.state = StreamState::Erroring;
        self.segmenter.reset();
        self.metrics.record_request_error();
        warn!(session = %self.session_id, "Request failed: {}", err);

        if !matches!(err, PipelineError::SessionClosed) {
            let _ = self.events.send(ServerEvent::error(err));
        }
        self.state = StreamState::Closed;
    }

    /// Drive a whole completion stream. Request-fatal errors have already
    /// been reported to the client when this returns `Err`.
    pub async fn run(&mut self, mut stream: DeltaStream) -> Result<String, PipelineError> {
        let delta_timeout = self.settings.delta_timeout;
        loop {
            let next = match tokio::time::timeout(delta_timeout, stream.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(CompletionStreamError::Timeout(delta_timeout.as_secs()))),
            };

            let result = match next {
                Some(Ok(delta)) => self.ingest(&delta).map(|_| ()),
                Some(Err(e)) => Err(PipelineError::from(e)),
                None => return self.finish().inspect_err(|e| self.fail(e)),
            };
            if let Err(e) = result {
                self.fail(&e);
                return Err(e);
            }
        }
    }

    /// Session teardown: stop the queue and drop its pending work.
    pub async fn close(&mut self) {
        self.state = StreamState::Closed;
        self.queue.shutdown(self.settings.drain_grace).await;
    }

    fn enqueue(&mut self, sentence: Sentence) -> Result<(), PipelineError> {
        debug!(session = %self.session_id, sentence = sentence.index, "Sentence ready: {:?}", sentence.text);
        self.queue.enqueue(SynthesisJob {
            sentence,
            language: self.language.clone(),
        })?;
        self.metrics.record_sentence_enqueued();
        Ok(())
    }

    fn emit(&self, event: ServerEvent) -> Result<(), PipelineError> {
        self.events.send(event).map_err(|_| PipelineError::SessionClosed)
    }
}
