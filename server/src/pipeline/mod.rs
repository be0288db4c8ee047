//! The incremental response pipeline: token deltas in, ordered per-sentence
//! audio out.

pub mod coordinator;
pub mod queue;
pub mod segmenter;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{CoordinatorSettings, StreamCoordinator, StreamState};
pub use queue::{SynthesisJob, SynthesisQueue};
pub use segmenter::{Sentence, SentenceSegmenter, DEFAULT_ABBREVIATIONS};
pub use sink::{AudioDispatcher, AudioUnit, DeliveryMode, DirectSink, RelaySink, RELAY_END_MARKER};
