use std::path::PathBuf;
use thiserror::Error;

/// Failures of a media source or the chunk decoder built on it.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported media format: {0}")]
    Probe(String),
    #[error("no decodable track found")]
    NoTrack,
    #[error("seek to {time:.3}s failed: {reason}")]
    Seek { time: f64, reason: String },
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Audio device errors, modelled on the usual PCM device failure modes.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SinkError {
    /// The device ran dry and must be prepared again.
    #[error("audio device underrun")]
    Underrun,
    /// No space right now; retry later.
    #[error("audio device busy")]
    WouldBlock,
    #[error("audio device failure: {0}")]
    Device(String),
}
