//! In-crate fakes for pipeline tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tts_core::{AudioFormat, SynthesisError, SynthesizedAudio, Synthesizer};

/// Echoes the sentence text back as "audio", with scripted latency and
/// failures per sentence.
pub(crate) struct ScriptedSynthesizer {
    delays: HashMap<String, u64>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedSynthesizer {
    pub(crate) fn new() -> Self {
        Self {
            delays: HashMap::new(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, text: &str, millis: u64) -> Self {
        self.delays.insert(text.to_string(), millis);
        self
    }

    pub(crate) fn failing(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<SynthesizedAudio, SynthesisError> {
        self.calls.lock().unwrap().push(text.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if let Some(&millis) = self.delays.get(text) {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(text) {
            return Err(SynthesisError::Status {
                status: 500,
                body: "scripted failure".to_string(),
            });
        }
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            format: AudioFormat::Mp3,
        })
    }

    fn languages(&self) -> Vec<String> {
        vec!["ar".to_string(), "en".to_string()]
    }
}
