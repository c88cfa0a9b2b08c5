pub mod decode;
pub mod pcm;
pub mod resample;

pub use decode::{decode_file, load};
pub use resample::resample;

/// Mono sample buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Signal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Signal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }

    /// Samples in `[start_sec, start_sec + duration_sec)`, clipped to the buffer.
    pub fn window(&self, start_sec: f64, duration_sec: f64) -> Signal {
        let sr = self.sample_rate as f64;
        let len = self.samples.len();
        let start = ((start_sec.max(0.0) * sr).round() as usize).min(len);
        let end = (start + (duration_sec.max(0.0) * sr).round() as usize).min(len);
        Signal::new(self.samples[start..end].to_vec(), self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_clips_to_buffer() {
        let s = Signal::new((0..100).map(|i| i as f32).collect(), 10);
        let w = s.window(2.0, 3.0);
        assert_eq!(w.samples.len(), 30);
        assert_eq!(w.samples[0], 20.0);
        let tail = s.window(9.5, 5.0);
        assert_eq!(tail.samples.len(), 5);
        assert!(s.window(20.0, 1.0).is_empty());
        assert_eq!(s.duration(), 10.0);
    }
}
