use crate::error::MediaError;

use super::types::VideoFrame;

/// Decoded mono audio at the source rate.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    pub pts: f64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Clone, Debug)]
pub enum DecodedFrame {
    Audio(AudioFrame),
    Video(VideoFrame),
}

/// A seekable demuxer plus decoders.
///
/// `seek` may land before the requested time. After a seek callers must
/// `flush` before reading so no frames from the previous position leak out.
pub trait MediaSource: Send {
    fn audio_sample_rate(&self) -> Option<u32>;

    fn has_video(&self) -> bool;

    /// Track length in seconds when known.
    fn duration(&self) -> Option<f64>;

    /// Seek near `t` and return the position actually reached.
    fn seek(&mut self, t: f64) -> Result<f64, MediaError>;

    /// Drop decoder state buffered from before the last seek.
    fn flush(&mut self);

    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, MediaError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    /// In-memory source: a ramp of audio in fixed packets and optional video
    /// frames at a fixed rate. Seeks land on the packet boundary at or
    /// before the target.
    pub struct ScriptedSource {
        pub sample_rate: u32,
        pub audio: Vec<f32>,
        pub packet: usize,
        pub fps: Option<f64>,
        pub decode_delay: Duration,
        pub fail_seeks_at: Option<f64>,
        pub seeks: Arc<AtomicUsize>,
        /// Audio packets served after a seek before decoding fails.
        pub fail_after_packets: Option<usize>,
        packets_since_seek: usize,
        audio_pos: usize,
        video_idx: usize,
    }

    impl ScriptedSource {
        pub fn new(sample_rate: u32, seconds: f64) -> Self {
            let n = (seconds * sample_rate as f64).round() as usize;
            Self {
                sample_rate,
                audio: (0..n).map(|i| (i % 1000) as f32 / 1000.0 - 0.5).collect(),
                packet: (sample_rate / 10) as usize,
                fps: None,
                decode_delay: Duration::ZERO,
                fail_seeks_at: None,
                seeks: Arc::new(AtomicUsize::new(0)),
                fail_after_packets: None,
                packets_since_seek: 0,
                audio_pos: 0,
                video_idx: 0,
            }
        }

        pub fn with_video(mut self, fps: f64) -> Self {
            self.fps = Some(fps);
            self
        }

        pub fn with_decode_delay(mut self, delay: Duration) -> Self {
            self.decode_delay = delay;
            self
        }

        pub fn with_failure_after(mut self, packets: usize) -> Self {
            self.fail_after_packets = Some(packets);
            self
        }

        fn video_pts(&self, idx: usize) -> Option<f64> {
            let fps = self.fps?;
            let pts = idx as f64 / fps;
            (pts < self.duration().unwrap_or(0.0)).then_some(pts)
        }
    }

    impl MediaSource for ScriptedSource {
        fn audio_sample_rate(&self) -> Option<u32> {
            Some(self.sample_rate)
        }

        fn has_video(&self) -> bool {
            self.fps.is_some()
        }

        fn duration(&self) -> Option<f64> {
            Some(self.audio.len() as f64 / self.sample_rate as f64)
        }

        fn seek(&mut self, t: f64) -> Result<f64, MediaError> {
            self.seeks.fetch_add(1, Ordering::SeqCst);
            if let Some(bad) = self.fail_seeks_at {
                if (t - bad).abs() < 1e-9 {
                    return Err(MediaError::Seek {
                        time: t,
                        reason: "scripted failure".into(),
                    });
                }
            }
            self.packets_since_seek = 0;
            let target = (t.max(0.0) * self.sample_rate as f64) as usize;
            self.audio_pos = (target / self.packet) * self.packet;
            let landed = self.audio_pos as f64 / self.sample_rate as f64;
            if let Some(fps) = self.fps {
                self.video_idx = (landed * fps).floor() as usize;
            }
            Ok(landed)
        }

        fn flush(&mut self) {}

        fn next_frame(&mut self) -> Result<Option<DecodedFrame>, MediaError> {
            if !self.decode_delay.is_zero() {
                std::thread::sleep(self.decode_delay);
            }
            let audio_pts = self.audio_pos as f64 / self.sample_rate as f64;
            if let Some(vpts) = self.video_pts(self.video_idx) {
                if vpts <= audio_pts || self.audio_pos >= self.audio.len() {
                    self.video_idx += 1;
                    return Ok(Some(DecodedFrame::Video(VideoFrame {
                        width: 2,
                        height: 2,
                        pts: vpts,
                        pixels: Arc::from(vec![self.video_idx as u8; 16]),
                    })));
                }
            }
            if self.audio_pos >= self.audio.len() {
                return Ok(None);
            }
            if self.fail_after_packets.is_some_and(|n| self.packets_since_seek >= n) {
                return Err(MediaError::Decode("scripted failure".into()));
            }
            self.packets_since_seek += 1;
            let end = (self.audio_pos + self.packet).min(self.audio.len());
            let frame = AudioFrame {
                pts: audio_pts,
                sample_rate: self.sample_rate,
                samples: self.audio[self.audio_pos..end].to_vec(),
            };
            self.audio_pos = end;
            Ok(Some(DecodedFrame::Audio(frame)))
        }
    }
}
