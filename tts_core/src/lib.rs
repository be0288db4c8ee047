//! Speech-side collaborators: text-to-speech over HTTP, a language -> voice
//! map, and in-memory transcoding to linear PCM for downstream consumers.

mod format;
mod synth;
mod transcode;
mod voices;
mod wav;

pub use format::AudioFormat;
pub use synth::{ElevenLabsClient, SpeechConfig, SynthesisError, SynthesizedAudio, Synthesizer};
pub use transcode::{decode_mono, resample_mono, PcmTarget, SymphoniaTranscoder, TranscodeError, Transcoder};
pub use voices::{VoiceEntry, VoiceMap};
pub use wav::{encode_base64, encode_wav_i16};
