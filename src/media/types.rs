use std::sync::Arc;

use crate::audio::{pcm, Signal};

/// Fixed-length block of mono S16LE audio starting at `t0`.
#[derive(Clone, Debug, Default)]
pub struct AudioChunk {
    pub t0: f64,
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Little-endian signed 16-bit PCM.
    pub samples: Vec<u8>,
}

impl AudioChunk {
    pub fn frames(&self) -> usize {
        let bytes_per_frame = 2 * self.channels.max(1) as usize;
        self.samples.len() / bytes_per_frame
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn pcm(&self) -> Vec<i16> {
        pcm::decode_s16le(&self.samples)
    }

    /// Float view of the chunk for analysis.
    pub fn to_signal(&self) -> Signal {
        Signal::new(pcm::s16le_to_f32(&self.samples), self.sample_rate)
    }
}

/// One RGBA video frame. Pixels are shared so consumers can display them
/// without copying.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pts: f64,
    pub pixels: Arc<[u8]>,
}

/// Decoded media for `[t0, t0 + duration)`: audio plus video frames ordered by pts.
#[derive(Clone, Debug, Default)]
pub struct MediaChunk {
    pub t0: f64,
    pub duration: f64,
    pub audio: AudioChunk,
    pub video: Vec<VideoFrame>,
    pub valid: bool,
}

impl MediaChunk {
    pub fn end(&self) -> f64 {
        self.t0 + self.duration
    }

    pub fn last_video_pts(&self) -> Option<f64> {
        self.video.last().map(|f| f.pts)
    }
}

/// Dedup key of a chunk request: the start time in microseconds.
pub fn chunk_id(t: f64) -> i64 {
    (t * 1e6).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_microsecond_keys() {
        assert_eq!(chunk_id(0.5), 500_000);
        assert_eq!(chunk_id(0.1 + 0.2), chunk_id(0.3));
        assert_ne!(chunk_id(1.0), chunk_id(1.000002));
    }

    #[test]
    fn audio_chunk_frames() {
        let chunk = AudioChunk {
            t0: 1.0,
            duration: 0.5,
            sample_rate: 8000,
            channels: 1,
            samples: pcm::encode_s16le(&vec![0.25; 4000]),
        };
        assert_eq!(chunk.frames(), 4000);
        let signal = chunk.to_signal();
        assert_eq!(signal.samples.len(), 4000);
        assert_eq!(signal.sample_rate, 8000);
    }
}
