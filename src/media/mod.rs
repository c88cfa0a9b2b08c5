//! Seekable media sources and the chunked background decoder.

pub mod decoder;
pub mod file;
pub mod source;
pub mod types;

pub use decoder::{decode_window, ChunkDecoder, DecoderQueue, RequestOutcome};
pub use file::SymphoniaSource;
pub use source::{AudioFrame, DecodedFrame, MediaSource};
pub use types::{chunk_id, AudioChunk, MediaChunk, VideoFrame};
