//! Ordered, single-flight speech synthesis for one session.
//!
//! Sentences go into an unbounded FIFO so token ingestion never waits on
//! synthesis. One worker task owns the receiving end and handles a job
//! completely (synthesize, then deliver) before taking the next, so audio
//! leaves in detection order whatever the per-sentence latency.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, warn};
use tts_core::Synthesizer;
use uuid::Uuid;

use crate::{
    error::PipelineError,
    metrics::PipelineMetrics,
    pipeline::{
        segmenter::Sentence,
        sink::{AudioDispatcher, AudioUnit},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisJob {
    pub sentence: Sentence,
    pub language: String,
}

pub struct SynthesisQueue {
    tx: Option<mpsc::UnboundedSender<SynthesisJob>>,
    /// Jobs enqueued but not yet finished, including the one in flight.
    pending: Arc<watch::Sender<usize>>,
    closed: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SynthesisQueue {
    pub fn spawn(
        session_id: Uuid,
        synthesizer: Arc<dyn Synthesizer>,
        dispatcher: AudioDispatcher,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(watch::Sender::new(0usize));
        let closed = Arc::new(AtomicBool::new(false));

        let worker = SynthesisWorker {
            session_id,
            rx,
            synthesizer,
            dispatcher,
            metrics,
            pending: pending.clone(),
            closed: closed.clone(),
        };

        Self {
            tx: Some(tx),
            pending,
            closed,
            worker: Some(tokio::spawn(worker.drain())),
        }
    }

    /// Append to the tail. Never waits; fails only once the queue is closed.
    pub fn enqueue(&self, job: SynthesisJob) -> Result<(), PipelineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PipelineError::SessionClosed);
        }
        let tx = self.tx.as_ref().ok_or(PipelineError::SessionClosed)?;

        self.pending.send_modify(|n| *n += 1);
        if tx.send(job).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return Err(PipelineError::SessionClosed);
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn is_busy(&self) -> bool {
        self.pending() > 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once every job enqueued so far has been delivered or dropped.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting work and discard what has not started. The job in
    /// flight gets `grace` to finish; its result is thrown away either way.
    pub async fn shutdown(&mut self, grace: Duration) {
        self.closed.store(true, Ordering::Release);
        self.tx.take();

        if let Some(mut handle) = self.worker.take() {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("Synthesis worker still busy after {:?}, aborting", grace);
                handle.abort();
            }
        }
    }
}

impl Drop for SynthesisQueue {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            handle.abort();
        }
    }
}

struct SynthesisWorker {
    session_id: Uuid,
    rx: mpsc::UnboundedReceiver<SynthesisJob>,
    synthesizer: Arc<dyn Synthesizer>,
    dispatcher: AudioDispatcher,
    metrics: Arc<PipelineMetrics>,
    pending: Arc<watch::Sender<usize>>,
    closed: Arc<AtomicBool>,
}

impl SynthesisWorker {
    async fn drain(mut self) {
        while let Some(job) = self.rx.recv().await {
            if self.closed.load(Ordering::Acquire) {
                debug!(session = %self.session_id, sentence = job.sentence.index, "Discarding queued sentence");
            } else {
                self.process(job).await;
            }
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
        }
        debug!(session = %self.session_id, "Synthesis worker stopped");
    }

    /// Failures stop here: the sentence is skipped, the queue moves on.
    async fn process(&self, job: SynthesisJob) {
        let index = job.sentence.index;
        debug!(session = %self.session_id, sentence = index, "Synthesizing: {:?}", job.sentence.text);

        let started = Instant::now();
        let audio = match self.synthesizer.synthesize(&job.sentence.text, &job.language).await {
            Ok(audio) => audio,
            Err(e) => {
                self.metrics.record_synthesis_failure();
                warn!(
                    session = %self.session_id,
                    sentence = index,
                    "Skipping sentence: {}",
                    PipelineError::from(e)
                );
                return;
            }
        };
        self.metrics.record_synthesis(started.elapsed().as_millis() as u64);

        if self.closed.load(Ordering::Acquire) {
            debug!(session = %self.session_id, sentence = index, "Session closed, dropping audio");
            return;
        }

        match self.dispatcher.deliver(AudioUnit { index, audio }).await {
            Ok(()) => self.metrics.record_delivery(),
            Err(e) if e.is_job_scoped() => {
                self.metrics.record_relay_failure();
                error!(
                    session = %self.session_id,
                    sentence = index,
                    mode = %self.dispatcher.mode(),
                    "Audio delivery failed: {}",
                    e
                );
            }
            Err(e) => {
                debug!(session = %self.session_id, sentence = index, "Dropping audio: {}", e);
            }
        }
    }
}
