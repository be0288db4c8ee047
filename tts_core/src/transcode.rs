//! In-memory transcoding to linear PCM.
//!
//! Decode whatever container the synthesizer produced, fold it down to mono,
//! resample, and wrap the result in a WAV container. Everything happens on
//! owned buffers, so there is no temporary storage to clean up on any path.

use std::io::Cursor;

use rubato::{FftFixedIn, Resampler};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use thiserror::Error;
use tracing::debug;

use crate::{format::AudioFormat, wav::encode_wav_i16};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("unrecognised {format} input: {reason}")]
    Probe { format: AudioFormat, reason: String },

    #[error("no decodable audio track")]
    NoAudioTrack,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("resample failed: {0}")]
    Resample(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),
}

/// Shape of the PCM the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmTarget {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmTarget {
    /// Mono, 16 kHz, 16-bit linear PCM.
    pub const RELAY: PcmTarget = PcmTarget {
        sample_rate: 16_000,
        channels: 1,
        bits_per_sample: 16,
    };
}

pub trait Transcoder: Send + Sync {
    /// CPU bound; async callers should run it on a blocking thread.
    fn transcode(&self, audio: &[u8], source: AudioFormat, target: &PcmTarget) -> Result<Vec<u8>, TranscodeError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaTranscoder;

impl Transcoder for SymphoniaTranscoder {
    fn transcode(&self, audio: &[u8], source: AudioFormat, target: &PcmTarget) -> Result<Vec<u8>, TranscodeError> {
        if target.channels != 1 || target.bits_per_sample != 16 {
            return Err(TranscodeError::UnsupportedTarget(format!(
                "{} channel(s), {} bit",
                target.channels, target.bits_per_sample
            )));
        }

        let (mono, sample_rate) = decode_mono(audio, source)?;
        let resampled = resample_mono(&mono, sample_rate, target.sample_rate)
            .map_err(|e| TranscodeError::Resample(e.to_string()))?;
        debug!(
            "Transcoded {} {} samples @ {} Hz -> {} samples @ {} Hz",
            mono.len(),
            source,
            sample_rate,
            resampled.len(),
            target.sample_rate
        );

        encode_wav_i16(&resampled, target.sample_rate).map_err(|e| TranscodeError::Encode(e.to_string()))
    }
}

/// Decode the first audio track to mono f32, averaging channels.
pub fn decode_mono(audio: &[u8], source: AudioFormat) -> Result<(Vec<f32>, u32), TranscodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(audio.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = source.extension() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| TranscodeError::Probe {
            format: source,
            reason: e.to_string(),
        })?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(TranscodeError::NoAudioTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| TranscodeError::Decode(format!("unsupported codec: {e}")))?;

    let mut mono = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(TranscodeError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(TranscodeError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let rate = *sample_rate.get_or_insert(spec.rate);
        if rate != spec.rate {
            return Err(TranscodeError::Decode(format!(
                "sample rate changed mid-stream ({rate} -> {})",
                spec.rate
            )));
        }

        let channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        mono.extend(
            buf.samples()
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    let sample_rate = sample_rate.ok_or(TranscodeError::NoAudioTrack)?;
    Ok((mono, sample_rate))
}

/// Resample mono PCM with an FFT resampler. The resampler's output delay is
/// dropped from the head and the zero-padded tail is trimmed, so the result
/// is exactly `len * sr_out / sr_in` samples (rounded up).
pub fn resample_mono(input: &[f32], sr_in: u32, sr_out: u32) -> anyhow::Result<Vec<f32>> {
    if sr_in == sr_out || input.is_empty() {
        return Ok(input.to_vec());
    }

    const CHUNK: usize = 1024;
    const SUB_CHUNKS: usize = 2;
    let mut resampler = FftFixedIn::<f32>::new(sr_in as usize, sr_out as usize, CHUNK, SUB_CHUNKS, 1)?;

    let expected_len = (input.len() as f64 * sr_out as f64 / sr_in as f64).ceil() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected_len + delay + CHUNK);

    let mut pos = 0;
    while out.len() < expected_len + delay {
        let chunk_size = resampler.input_frames_next();
        let mut input_chunk = vec![0.0; chunk_size];
        if pos < input.len() {
            let end = (pos + chunk_size).min(input.len());
            input_chunk[..end - pos].copy_from_slice(&input[pos..end]);
            pos = end;
        }

        let frames = resampler.process(&[input_chunk], None)?;
        out.extend_from_slice(&frames[0]);
    }

    out.drain(..delay);
    out.truncate(expected_len);
    Ok(out)
}
