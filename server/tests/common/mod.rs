//! Common utilities for integration tests

#![allow(dead_code)]

use std::{
    collections::HashSet,
    io::Cursor,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use llm_core::{deltas_from, CompletionSource, CompletionStreamError, DeltaStream};
use serde_json::Value;
use stt_core::{Transcriber, TranscriptionError};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tts_core::{AudioFormat, SymphoniaTranscoder, SynthesisError, SynthesizedAudio, Synthesizer};
use voice_relay::{build_router, AppState, ServerConfig, Services};

pub type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Replies to every prompt with the same fragments, or fails.
pub struct ScriptedCompletion {
    fragments: Vec<String>,
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::<String>::new())
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionSource for ScriptedCompletion {
    async fn stream_completion(&self, prompt: &str) -> Result<DeltaStream, CompletionStreamError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail {
            return Err(CompletionStreamError::Status {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }
        Ok(deltas_from(self.fragments.clone()))
    }
}

/// Speaks "en" and "ar". Returns the sentence text as MP3-labelled bytes,
/// or a real WAV tone when built with `wav_output`.
pub struct FakeSynthesizer {
    failing: HashSet<String>,
    wav_output: bool,
    delay: Duration,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            wav_output: false,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn wav_output(mut self) -> Self {
        self.wav_output = true;
        self
    }

    /// Take this long over every sentence.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, language: &str) -> Result<SynthesizedAudio, SynthesisError> {
        self.calls.lock().unwrap().push((text.to_string(), language.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(text) {
            return Err(SynthesisError::Status {
                status: 500,
                body: "scripted failure".to_string(),
            });
        }
        if self.wav_output {
            return Ok(SynthesizedAudio {
                bytes: tone_wav(22_050, 11_025),
                format: AudioFormat::Wav,
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

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribeCall {
    pub bytes: usize,
    pub mime_type: Option<String>,
    pub language: String,
}

pub struct FakeTranscriber {
    transcript: Option<String>,
    calls: Mutex<Vec<TranscribeCall>>,
}

impl FakeTranscriber {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: Some(transcript.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hears nothing in any upload.
    pub fn silent() -> Self {
        Self {
            transcript: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<TranscribeCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        mime_type: Option<&str>,
        language: &str,
    ) -> Result<String, TranscriptionError> {
        self.calls.lock().unwrap().push(TranscribeCall {
            bytes: audio.len(),
            mime_type: mime_type.map(str::to_string),
            language: language.to_string(),
        });
        self.transcript.clone().ok_or(TranscriptionError::NoSpeech)
    }
}

/// Mono 16-bit sine tone.
pub fn tone_wav(sample_rate: u32, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut out = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            writer
                .write_sample(((t * 220.0 * std::f32::consts::TAU).sin() * 6000.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    out
}

pub struct TestHarness {
    pub completion: Arc<ScriptedCompletion>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub transcriber: Arc<FakeTranscriber>,
    pub config: ServerConfig,
}

impl TestHarness {
    pub fn new(completion: ScriptedCompletion) -> Self {
        let config = ServerConfig {
            drain_grace_secs: 2,
            llm_timeout_secs: 5,
            ..ServerConfig::default()
        };
        Self {
            completion: Arc::new(completion),
            synthesizer: Arc::new(FakeSynthesizer::new()),
            transcriber: Arc::new(FakeTranscriber::new("What time is it?")),
            config,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: FakeSynthesizer) -> Self {
        self.synthesizer = Arc::new(synthesizer);
        self
    }

    pub fn with_transcriber(mut self, transcriber: FakeTranscriber) -> Self {
        self.transcriber = Arc::new(transcriber);
        self
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> AppState {
        let services = Services {
            transcriber: self.transcriber.clone(),
            completion: self.completion.clone(),
            synthesizer: self.synthesizer.clone(),
            transcoder: Arc::new(SymphoniaTranscoder),
        };
        AppState::new(services, self.config.clone())
    }

    pub fn router(&self) -> Router {
        build_router(self.state()).unwrap()
    }

    /// Serve the app on an ephemeral port.
    pub async fn spawn(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

pub async fn connect(addr: SocketAddr) -> TestSocket {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

pub async fn send_json(ws: &mut TestSocket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

pub async fn send_binary(ws: &mut TestSocket, bytes: Vec<u8>) {
    ws.send(Message::Binary(bytes.into())).await.unwrap();
}

/// Next JSON event from the server, failing the test after five seconds.
pub async fn next_event(ws: &mut TestSocket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a server event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Read events until `done` returns true for the list read so far.
pub async fn events_until(ws: &mut TestSocket, done: impl Fn(&[Value]) -> bool) -> Vec<Value> {
    let mut events = Vec::new();
    while !done(&events) {
        events.push(next_event(ws).await);
    }
    events
}

pub fn of_type<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["type"] == kind).collect()
}

pub fn count_type(events: &[Value], kind: &str) -> usize {
    of_type(events, kind).len()
}

/// Accept `connections` relay transactions, returning the messages of each.
pub async fn relay_endpoint(connections: usize) -> (String, tokio::task::JoinHandle<Vec<Vec<Message>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut transactions = Vec::new();
        for _ in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
                received.push(msg);
            }
            transactions.push(received);
        }
        transactions
    });
    (url, handle)
}
