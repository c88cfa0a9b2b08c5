use std::time::{Duration, Instant};

use crate::error::SinkError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    /// Ready; starts on the first write.
    Prepared,
    Running,
    /// Ran dry while running. Needs `prepare` or `recover`.
    Xrun,
    /// Dropped or drained.
    Stopped,
}

/// Mono S16 playback device. `delay` is the number of frames written but
/// not yet audible and is the reference for the playback clock.
pub trait AudioSink: Send {
    fn sample_rate(&self) -> u32;

    fn prepare(&mut self) -> Result<(), SinkError>;

    /// Frames that can be written without blocking.
    fn avail(&mut self) -> Result<usize, SinkError>;

    /// Write up to `frames.len()` frames, returning how many were taken.
    fn write(&mut self, frames: &[i16]) -> Result<usize, SinkError>;

    fn delay(&mut self) -> Result<i64, SinkError>;

    fn state(&mut self) -> SinkState;

    fn recover(&mut self, err: &SinkError) -> Result<(), SinkError>;

    /// Discard everything queued without playing it.
    fn drop_pending(&mut self);

    /// Block until everything queued has played.
    fn drain(&mut self);
}

/// Device simulated against the wall clock: it consumes `rate` seconds of
/// audio per second from a buffer of fixed capacity. A rate of zero models a
/// stalled device.
pub struct VirtualSink {
    sample_rate: u32,
    capacity: usize,
    rate: f64,
    queued: usize,
    played: u64,
    carry: f64,
    state: SinkState,
    last_tick: Instant,
}

impl VirtualSink {
    pub fn new(sample_rate: u32, buffer_ms: u64) -> Self {
        let capacity = (sample_rate as u64 * buffer_ms / 1000).max(1) as usize;
        Self {
            sample_rate,
            capacity,
            rate: 1.0,
            queued: 0,
            played: 0,
            carry: 0.0,
            state: SinkState::Prepared,
            last_tick: Instant::now(),
        }
    }

    /// Play `rate` times faster than real time.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate.max(0.0);
        self
    }

    pub fn stalled(sample_rate: u32, buffer_ms: u64) -> Self {
        Self::new(sample_rate, buffer_ms).with_rate(0.0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames consumed since creation.
    pub fn played_frames(&self) -> u64 {
        self.played
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick);
        self.last_tick = now;
        if self.state != SinkState::Running {
            return;
        }
        self.carry += dt.as_secs_f64() * self.sample_rate as f64 * self.rate;
        let n = (self.carry.floor() as usize).min(self.queued);
        self.carry -= n as f64;
        self.queued -= n;
        self.played += n as u64;
        if self.queued == 0 {
            self.carry = 0.0;
            self.state = SinkState::Xrun;
        }
    }
}

impl AudioSink for VirtualSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn prepare(&mut self) -> Result<(), SinkError> {
        self.queued = 0;
        self.carry = 0.0;
        self.state = SinkState::Prepared;
        self.last_tick = Instant::now();
        Ok(())
    }

    fn avail(&mut self) -> Result<usize, SinkError> {
        self.advance();
        match self.state {
            SinkState::Xrun => Err(SinkError::Underrun),
            SinkState::Stopped => Err(SinkError::Device("not prepared".into())),
            _ => Ok(self.capacity - self.queued),
        }
    }

    fn write(&mut self, frames: &[i16]) -> Result<usize, SinkError> {
        self.advance();
        match self.state {
            SinkState::Xrun => return Err(SinkError::Underrun),
            SinkState::Stopped => return Err(SinkError::Device("not prepared".into())),
            _ => {}
        }
        let space = self.capacity - self.queued;
        if space == 0 {
            return Err(SinkError::WouldBlock);
        }
        let n = space.min(frames.len());
        if n > 0 {
            self.queued += n;
            if self.state == SinkState::Prepared {
                self.state = SinkState::Running;
                self.last_tick = Instant::now();
            }
        }
        Ok(n)
    }

    fn delay(&mut self) -> Result<i64, SinkError> {
        self.advance();
        match self.state {
            SinkState::Xrun => Err(SinkError::Underrun),
            _ => Ok(self.queued as i64),
        }
    }

    fn state(&mut self) -> SinkState {
        self.advance();
        self.state
    }

    fn recover(&mut self, err: &SinkError) -> Result<(), SinkError> {
        match err {
            SinkError::Underrun => self.prepare(),
            SinkError::WouldBlock => Ok(()),
            SinkError::Device(_) if self.state == SinkState::Stopped => self.prepare(),
            other => Err(other.clone()),
        }
    }

    fn drop_pending(&mut self) {
        self.queued = 0;
        self.carry = 0.0;
        self.state = SinkState::Stopped;
    }

    fn drain(&mut self) {
        if self.rate <= 0.0 {
            self.drop_pending();
            return;
        }
        loop {
            self.advance();
            if self.state != SinkState::Running {
                break;
            }
            let left = self.queued as f64 / (self.sample_rate as f64 * self.rate);
            std::thread::sleep(Duration::from_secs_f64(left.clamp(0.001, 0.005)));
        }
        self.state = SinkState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_respects_capacity() {
        let mut sink = VirtualSink::stalled(1000, 100);
        assert_eq!(sink.capacity(), 100);
        assert_eq!(sink.state(), SinkState::Prepared);
        assert_eq!(sink.write(&[0; 60]), Ok(60));
        assert_eq!(sink.state(), SinkState::Running);
        assert_eq!(sink.write(&[0; 60]), Ok(40));
        assert_eq!(sink.write(&[0; 1]), Err(SinkError::WouldBlock));
        assert_eq!(sink.delay(), Ok(100));
        assert_eq!(sink.avail(), Ok(0));
    }

    #[test]
    fn runs_dry_into_xrun_and_recovers() {
        let mut sink = VirtualSink::new(1000, 100).with_rate(10.0);
        sink.write(&[0; 50]).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.state(), SinkState::Xrun);
        assert_eq!(sink.write(&[0; 10]), Err(SinkError::Underrun));
        assert!(sink.played_frames() >= 50);
        sink.recover(&SinkError::Underrun).unwrap();
        assert_eq!(sink.state(), SinkState::Prepared);
        assert_eq!(sink.write(&[0; 10]), Ok(10));
    }

    #[test]
    fn drop_requires_prepare() {
        let mut sink = VirtualSink::stalled(1000, 100);
        sink.write(&[0; 10]).unwrap();
        sink.drop_pending();
        assert!(matches!(sink.write(&[0; 10]), Err(SinkError::Device(_))));
        sink.prepare().unwrap();
        assert_eq!(sink.delay(), Ok(0));
    }

    #[test]
    fn drain_waits_for_playout() {
        let mut sink = VirtualSink::new(1000, 100).with_rate(5.0);
        sink.write(&[0; 100]).unwrap();
        let start = Instant::now();
        sink.drain();
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(sink.state(), SinkState::Stopped);
        assert_eq!(sink.played_frames(), 100);
    }
}
