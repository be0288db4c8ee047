//! Delivery of synthesized audio: inline to the client, or transcoded and
//! forwarded to a relay endpoint.

use std::{fmt, str::FromStr, sync::Arc};

use futures_util::SinkExt;
use serde::Serialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};
use tts_core::{encode_base64, PcmTarget, SynthesizedAudio, Transcoder};

use crate::{
    config::RelayConfig,
    error::PipelineError,
    protocol::{EventSender, ServerEvent},
};

/// Text frame closing every relay transaction.
pub const RELAY_END_MARKER: &str = "END";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// base64 `audio_chunk` events on the client socket
    Direct,
    /// 16 kHz mono WAV streamed to the relay endpoint
    Relay,
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audio" | "direct" => Ok(DeliveryMode::Direct),
            "audio-with-avatar" | "relay" => Ok(DeliveryMode::Relay),
            other => Err(format!("unknown delivery mode '{other}'")),
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Direct => f.write_str("direct"),
            DeliveryMode::Relay => f.write_str("relay"),
        }
    }
}

/// Synthesized speech for one sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioUnit {
    pub index: u64,
    pub audio: SynthesizedAudio,
}

pub struct DirectSink {
    events: EventSender,
}

impl DirectSink {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    pub fn deliver(&self, unit: AudioUnit) -> Result<(), PipelineError> {
        let chunk = encode_base64(&unit.audio.bytes);
        self.events
            .send(ServerEvent::AudioChunk {
                index: unit.index,
                chunk,
            })
            .map_err(|_| PipelineError::SessionClosed)
    }
}

#[derive(Serialize)]
struct RelayHeader {
    sample_rate: u32,
}

pub struct RelaySink {
    transcoder: Arc<dyn Transcoder>,
    config: RelayConfig,
}

impl RelaySink {
    pub fn new(transcoder: Arc<dyn Transcoder>, config: RelayConfig) -> Self {
        Self { transcoder, config }
    }

    /// One complete transaction per unit: transcode, connect, header,
    /// chunked payload, end marker, close.
    pub async fn deliver(&self, unit: AudioUnit) -> Result<(), PipelineError> {
        let index = unit.index;
        let wav = self.transcode(unit.audio).await?;

        tokio::time::timeout(self.config.timeout, self.send(&wav))
            .await
            .map_err(|_| {
                PipelineError::RelayDelivery(format!(
                    "timed out after {}s",
                    self.config.timeout.as_secs()
                ))
            })??;

        info!(sentence = index, "Sent {} bytes of WAV audio to relay {}", wav.len(), self.config.url);
        Ok(())
    }

    async fn transcode(&self, audio: SynthesizedAudio) -> Result<Vec<u8>, PipelineError> {
        let transcoder = self.transcoder.clone();
        tokio::task::spawn_blocking(move || transcoder.transcode(&audio.bytes, audio.format, &PcmTarget::RELAY))
            .await
            .map_err(|e| PipelineError::RelayDelivery(format!("transcode task failed: {e}")))?
            .map_err(PipelineError::from)
    }

    async fn send(&self, wav: &[u8]) -> Result<(), PipelineError> {
        let (mut ws, _) = connect_async(self.config.url.as_str()).await?;

        let header = serde_json::to_string(&RelayHeader {
            sample_rate: PcmTarget::RELAY.sample_rate,
        })
        .map_err(|e| PipelineError::RelayDelivery(e.to_string()))?;
        ws.send(Message::Text(header.into())).await?;

        let mut chunks = 0usize;
        for chunk in wav.chunks(self.config.chunk_size.max(1)) {
            ws.send(Message::Binary(chunk.to_vec().into())).await?;
            chunks += 1;
        }
        ws.send(Message::Text(RELAY_END_MARKER.into())).await?;
        ws.close(None).await?;

        debug!("Relay transaction finished: {} chunk(s)", chunks);
        Ok(())
    }
}

/// Routes each unit to the strategy picked at session start.
pub enum AudioDispatcher {
    Direct(DirectSink),
    Relay(RelaySink),
}

impl AudioDispatcher {
    pub fn for_mode(
        mode: DeliveryMode,
        events: EventSender,
        transcoder: Arc<dyn Transcoder>,
        relay: RelayConfig,
    ) -> Self {
        match mode {
            DeliveryMode::Direct => AudioDispatcher::Direct(DirectSink::new(events)),
            DeliveryMode::Relay => AudioDispatcher::Relay(RelaySink::new(transcoder, relay)),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        match self {
            AudioDispatcher::Direct(_) => DeliveryMode::Direct,
            AudioDispatcher::Relay(_) => DeliveryMode::Relay,
        }
    }

    pub async fn deliver(&self, unit: AudioUnit) -> Result<(), PipelineError> {
        match self {
            AudioDispatcher::Direct(sink) => sink.deliver(unit),
            AudioDispatcher::Relay(sink) => sink.deliver(unit).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, time::Duration};

    use futures_util::StreamExt;
    use tokio::{net::TcpListener, sync::mpsc};
    use tts_core::{AudioFormat, SymphoniaTranscoder};

    use super::*;

    fn wav_unit(index: u64, sample_rate: u32, channels: u16, frames: usize) -> AudioUnit {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for i in 0..frames * channels as usize {
                writer.write_sample(((i % 200) as i16 - 100) * 50).unwrap();
            }
            writer.finalize().unwrap();
        }
        AudioUnit {
            index,
            audio: SynthesizedAudio {
                bytes,
                format: AudioFormat::Wav,
            },
        }
    }

    /// Accept one relay connection and return every message up to close.
    async fn relay_listener() -> (String, tokio::task::JoinHandle<Vec<Message>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
                received.push(msg);
            }
            received
        });
        (url, handle)
    }

    fn relay_config(url: String, chunk_size: usize) -> RelayConfig {
        RelayConfig {
            url,
            chunk_size,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delivery_mode_parsing() {
        assert_eq!("audio".parse::<DeliveryMode>().unwrap(), DeliveryMode::Direct);
        assert_eq!("direct".parse::<DeliveryMode>().unwrap(), DeliveryMode::Direct);
        assert_eq!("audio-with-avatar".parse::<DeliveryMode>().unwrap(), DeliveryMode::Relay);
        assert_eq!("RELAY".parse::<DeliveryMode>().unwrap(), DeliveryMode::Relay);
        assert!("video".parse::<DeliveryMode>().is_err());
    }

    #[tokio::test]
    async fn test_direct_sink_emits_base64_chunk() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = AudioDispatcher::for_mode(
            DeliveryMode::Direct,
            tx,
            Arc::new(SymphoniaTranscoder),
            RelayConfig::default(),
        );
        assert_eq!(dispatcher.mode(), DeliveryMode::Direct);

        let unit = AudioUnit {
            index: 7,
            audio: SynthesizedAudio {
                bytes: b"ID3".to_vec(),
                format: AudioFormat::Mp3,
            },
        };
        dispatcher.deliver(unit).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::AudioChunk {
                index: 7,
                chunk: "SUQz".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_direct_sink_reports_closed_session() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = DirectSink::new(tx);
        let result = sink.deliver(wav_unit(0, 16_000, 1, 10));
        assert!(matches!(result, Err(PipelineError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_relay_transaction_wire_format() {
        let (url, server) = relay_listener().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let dispatcher = AudioDispatcher::for_mode(
            DeliveryMode::Relay,
            tx,
            Arc::new(SymphoniaTranscoder),
            relay_config(url, 4096),
        );

        dispatcher.deliver(wav_unit(0, 22_050, 2, 22_050)).await.unwrap();
        let received = server.await.unwrap();

        let header = received.first().unwrap().to_text().unwrap().to_string();
        let header: serde_json::Value = serde_json::from_str(&header).unwrap();
        assert_eq!(header, serde_json::json!({ "sample_rate": 16000 }));
        assert_eq!(received.last().unwrap().to_text().unwrap(), RELAY_END_MARKER);

        let payload: Vec<u8> = received[1..received.len() - 1]
            .iter()
            .inspect(|m| {
                assert!(m.is_binary());
                assert!(m.len() <= 4096);
            })
            .flat_map(|m| m.clone().into_data().to_vec())
            .collect();

        let reader = hound::WavReader::new(Cursor::new(payload)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 16_000);
    }

    #[tokio::test]
    async fn test_relay_transcodes_mp3_units() {
        let (url, server) = relay_listener().await;
        let sink = RelaySink::new(Arc::new(SymphoniaTranscoder), relay_config(url, 1024));
        let unit = AudioUnit {
            index: 3,
            audio: SynthesizedAudio {
                bytes: include_bytes!("../../../tts_core/tests/fixtures/silence_44k_mono.mp3").to_vec(),
                format: AudioFormat::Mp3,
            },
        };

        sink.deliver(unit).await.unwrap();
        let received = server.await.unwrap();
        assert_eq!(received.last().unwrap().to_text().unwrap(), RELAY_END_MARKER);

        let payload: Vec<u8> = received[1..received.len() - 1]
            .iter()
            .flat_map(|m| m.clone().into_data().to_vec())
            .collect();
        let spec = hound::WavReader::new(Cursor::new(payload)).unwrap().spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
    }

    #[tokio::test]
    async fn test_relay_unreachable_endpoint_is_delivery_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let sink = RelaySink::new(Arc::new(SymphoniaTranscoder), relay_config(url, 4096));
        let result = sink.deliver(wav_unit(0, 16_000, 1, 1600)).await;
        assert!(matches!(result, Err(PipelineError::RelayDelivery(_))));
    }

    #[tokio::test]
    async fn test_relay_transcode_failure_skips_connection() {
        let sink = RelaySink::new(
            Arc::new(SymphoniaTranscoder),
            relay_config("ws://127.0.0.1:1".to_string(), 4096),
        );
        let unit = AudioUnit {
            index: 0,
            audio: SynthesizedAudio {
                bytes: b"not audio at all".to_vec(),
                format: AudioFormat::Mp3,
            },
        };
        let result = sink.deliver(unit).await;
        assert!(matches!(result, Err(PipelineError::Transcode(_))));
    }
}
