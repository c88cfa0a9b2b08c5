use super::sink::AudioSink;

/// Audio-master playback clock: `base_t0` plus the frames the device has
/// actually played since the base was set.
#[derive(Clone, Copy, Debug)]
pub struct AudioClock {
    pub base_t0: f64,
    pub written: u64,
    pub sample_rate: u32,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            base_t0: 0.0,
            written: 0,
            sample_rate,
        }
    }

    pub fn rebase(&mut self, t0: f64) {
        self.base_t0 = t0;
        self.written = 0;
    }

    pub fn advance(&mut self, frames: usize) {
        self.written += frames as u64;
    }

    /// Current position. A failing delay query is recovered once; if it
    /// still fails the base is returned.
    pub fn played_sec(&self, sink: &mut dyn AudioSink) -> f64 {
        let delay = match sink.delay() {
            Ok(d) => d,
            Err(e) => match sink.recover(&e).and_then(|_| sink.delay()) {
                Ok(d) => d,
                Err(_) => return self.base_t0,
            },
        };
        played_from_delay(self.base_t0, self.written, delay, self.sample_rate)
    }
}

/// `t0 + clamp(written - max(delay, 0), 0, written) / sr`
pub fn played_from_delay(t0: f64, written: u64, delay: i64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return t0;
    }
    let written = written as i64;
    let played = (written - delay.max(0)).clamp(0, written);
    t0 + played as f64 / sample_rate as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::sink::VirtualSink;

    #[test]
    fn delay_math() {
        assert!((played_from_delay(2.0, 1000, 200, 1000) - 2.8).abs() < 1e-12);
        assert_eq!(played_from_delay(2.0, 1000, -5, 1000), 3.0);
        assert_eq!(played_from_delay(2.0, 1000, 5000, 1000), 2.0);
        assert_eq!(played_from_delay(2.0, 1000, 0, 0), 2.0);
    }

    #[test]
    fn clock_follows_device() {
        let mut sink = VirtualSink::stalled(1000, 500);
        let mut clock = AudioClock::new(1000);
        clock.rebase(1.5);
        let n = sink.write(&[0; 300]).unwrap();
        clock.advance(n);
        // nothing played yet on a stalled device
        assert_eq!(clock.played_sec(&mut sink), 1.5);
        sink.drop_pending();
        sink.prepare().unwrap();
        assert!((clock.played_sec(&mut sink) - 1.8).abs() < 1e-12);
    }
}
