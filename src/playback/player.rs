//! Playback sessions: pre-load, play, stop and seek over a chunk decoder and
//! an audio sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::config::PlaybackConfig;
use crate::error::SinkError;
use crate::events::{EventHub, PresentedFrame};
use crate::media::{ChunkDecoder, DecoderQueue, MediaSource, VideoFrame};

use super::clock::AudioClock;
use super::sink::{AudioSink, SinkState};

pub struct Player {
    decoder: ChunkDecoder,
    sink: Option<Box<dyn AudioSink>>,
    play_thread: Option<JoinHandle<Box<dyn AudioSink>>>,
    playing: Arc<AtomicBool>,
    /// Set by a restarting stop so the next stop is swallowed.
    continue_play: bool,
    origin: f64,
    next_req: Arc<Mutex<f64>>,
    position: Arc<AtomicU64>,
    events: Arc<EventHub>,
    config: PlaybackConfig,
}

impl Player {
    pub fn new(
        source: Box<dyn MediaSource>,
        sink: Box<dyn AudioSink>,
        events: Arc<EventHub>,
        config: PlaybackConfig,
    ) -> Self {
        let decoder = ChunkDecoder::new(source, sink.sample_rate(), config.chunk_sec, Arc::clone(&events));
        Self {
            decoder,
            sink: Some(sink),
            play_thread: None,
            playing: Arc::new(AtomicBool::new(false)),
            continue_play: false,
            origin: 0.0,
            next_req: Arc::new(Mutex::new(0.0)),
            position: Arc::new(AtomicU64::new(0f64.to_bits())),
            events,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<DecoderQueue> {
        self.decoder.queue()
    }

    pub fn duration(&self) -> Option<f64> {
        self.decoder.duration()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Last position reported by the playback clock.
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::SeqCst))
    }

    fn clamp_start(&self, start: f64) -> f64 {
        let start = start.max(0.0);
        match self.decoder.duration() {
            Some(d) => start.min(d),
            None => start,
        }
    }

    fn clamp_end(&self, end: f64) -> f64 {
        match self.decoder.duration() {
            Some(d) => end.min(d),
            None => end,
        }
    }

    /// Start decoding ahead from `start` so playback can begin without a
    /// cold seek. The first frame at `start` is published as a thumbnail.
    pub fn pre_load(&mut self, start: f64) {
        let start = self.clamp_start(start);
        let chunk = self.config.chunk_sec;
        self.decoder.start();
        self.origin = start;

        let queue = Arc::clone(self.decoder.queue());
        queue.clear_requests();
        queue.clear_chunks();
        let end = self.clamp_end(start + self.config.preload_window_chunks as f64 * chunk);
        queue.set_end_request(end);
        queue.want_thumbnail(start);

        let mut next = self.next_req.lock().expect("next request poisoned");
        *next = start;
        for _ in 0..self.config.preload_chunks {
            if *next >= end - 1e-9 {
                break;
            }
            queue.request_chunk(*next);
            *next += chunk;
        }
        self.position.store(start.to_bits(), Ordering::SeqCst);
        log::debug!("Pre-loading from {:.3}s", start);
    }

    /// Play `[start, start + duration)` on a background thread. Does nothing
    /// when already playing.
    pub fn play(&mut self, start: f64, duration: f64) -> Result<()> {
        if self.is_playing() {
            return Ok(());
        }
        self.reclaim_sink();
        let Some(sink) = self.sink.take() else {
            bail!("Audio sink unavailable");
        };

        let start = self.clamp_start(start);
        let chunk = self.config.chunk_sec;
        self.playing.store(true, Ordering::SeqCst);
        self.decoder.start();

        let queue = Arc::clone(self.decoder.queue());
        let reuse = (start - self.origin).abs() < 1e-9
            && queue.front_t0().is_some_and(|t0| (t0 - start).abs() < 1e-9);
        if !reuse {
            queue.clear_requests();
            queue.clear_chunks();
            *self.next_req.lock().expect("next request poisoned") = start;
            self.origin = start;
        }

        let end = self.clamp_end(start + duration.max(0.0));
        queue.set_end_request(end);
        self.events.decoded_event(end, "end play");
        self.continue_play = false;

        queue.fill_backlog(
            &mut self.next_req.lock().expect("next request poisoned"),
            chunk,
            self.config.backlog_target(),
            &self.playing,
        );

        let session = PlaySession {
            queue,
            playing: Arc::clone(&self.playing),
            next_req: Arc::clone(&self.next_req),
            position: Arc::clone(&self.position),
            events: Arc::clone(&self.events),
            config: self.config.clone(),
            end,
        };
        log::info!("Playing {:.3}s - {:.3}s", start, end);
        let handle = thread::Builder::new()
            .name("player".into())
            .spawn(move || session.run(sink));
        match handle {
            Ok(handle) => {
                self.play_thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.playing.store(false, Ordering::SeqCst);
                Err(e).context("Failed to spawn play thread")
            }
        }
    }

    /// Stop decoding and playback and clear every queue. With `restart`,
    /// decoding is re-armed at that time and the next `stop` is swallowed
    /// (returns false) so a stop-then-restart sequence tears down only once.
    pub fn stop(&mut self, restart: Option<f64>) -> bool {
        if self.continue_play {
            self.continue_play = false;
            return false;
        }

        // the play thread is joined before the decoder clears its requests
        self.playing.store(false, Ordering::SeqCst);
        self.decoder.queue().notify_chunks();
        self.reclaim_sink();
        self.decoder.stop();
        self.decoder.queue().clear_chunks();
        if let Some(sink) = self.sink.as_mut() {
            sink.drop_pending();
            if let Err(e) = sink.prepare() {
                log::warn!("Failed to prepare audio sink: {}", e);
            }
        }

        if let Some(t) = restart.filter(|t| *t >= 0.0) {
            self.continue_play = true;
            self.pre_load(t);
        }
        true
    }

    /// Stop and return the position reached.
    pub fn pause(&mut self) -> f64 {
        self.continue_play = false;
        self.stop(None);
        self.position()
    }

    pub fn seek(&mut self, sec: f64, duration: f64) -> Result<()> {
        self.continue_play = false;
        self.stop(Some(sec));
        self.play(sec, duration)
    }

    /// Block until the current session finishes on its own.
    pub fn wait(&mut self) {
        self.reclaim_sink();
    }

    fn reclaim_sink(&mut self) {
        if let Some(handle) = self.play_thread.take() {
            match handle.join() {
                Ok(sink) => self.sink = Some(sink),
                Err(_) => log::error!("Play thread panicked, audio sink lost"),
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.continue_play = false;
        self.stop(None);
    }
}

struct PlaySession {
    queue: Arc<DecoderQueue>,
    playing: Arc<AtomicBool>,
    next_req: Arc<Mutex<f64>>,
    position: Arc<AtomicU64>,
    events: Arc<EventHub>,
    config: PlaybackConfig,
    end: f64,
}

enum WriteStep {
    Wrote(usize),
    Idle,
    Failed,
}

impl PlaySession {
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn present(&self, frame: &VideoFrame, played: f64, last_presented: &mut Option<f64>) {
        if last_presented.is_some_and(|p| (p - frame.pts).abs() < 1e-9) {
            return;
        }
        self.events.video_frame(&PresentedFrame::from_video(frame, played));
        *last_presented = Some(frame.pts);
    }

    fn report(&self, played: f64) {
        self.position.store(played.to_bits(), Ordering::SeqCst);
        self.events.played_sec(played);
    }

    /// One bounded write. Underruns re-prime the device and rebase the clock
    /// at `resume_at`.
    fn write_slice(
        &self,
        sink: &mut dyn AudioSink,
        clock: &mut AudioClock,
        pcm: &[i16],
        slice: usize,
        resume_at: f64,
    ) -> WriteStep {
        let avail = match sink.avail() {
            Ok(0) => return WriteStep::Idle,
            Ok(avail) => avail,
            Err(e) => return self.handle_error(sink, clock, e, resume_at),
        };
        let n = avail.min(slice).min(pcm.len());
        match sink.write(&pcm[..n]) {
            Ok(written) => {
                clock.advance(written);
                WriteStep::Wrote(written)
            }
            Err(e) => self.handle_error(sink, clock, e, resume_at),
        }
    }

    fn handle_error(&self, sink: &mut dyn AudioSink, clock: &mut AudioClock, err: SinkError, resume_at: f64) -> WriteStep {
        match err {
            SinkError::WouldBlock => WriteStep::Idle,
            SinkError::Underrun => {
                log::debug!("Audio underrun at {:.3}s", resume_at);
                if let Err(e) = sink.prepare() {
                    log::warn!("Failed to re-prime audio sink: {}", e);
                    return WriteStep::Failed;
                }
                clock.rebase(resume_at);
                WriteStep::Idle
            }
            other => match sink.recover(&other) {
                Ok(()) => WriteStep::Idle,
                Err(e) => {
                    log::warn!("Audio sink failed: {}", e);
                    WriteStep::Failed
                }
            },
        }
    }

    fn run(self, mut sink: Box<dyn AudioSink>) -> Box<dyn AudioSink> {
        let sr = sink.sample_rate();
        if let Err(e) = sink.prepare() {
            log::warn!("Failed to prepare audio sink: {}", e);
        }
        let lead = self.config.lead_sec;
        let slice = ((sr as f64 * self.config.write_slice_ms as f64 / 1000.0).round() as usize).max(1);
        let watchdog = Duration::from_millis(self.config.watchdog_ms);
        let wait = Duration::from_millis(self.config.chunk_wait_ms);
        let target = self.config.backlog_target();

        let mut clock = AudioClock::new(sr);
        let mut clock_set = false;
        let mut last_presented: Option<f64> = None;
        let mut played = clock.base_t0;

        while self.is_playing() {
            {
                let mut next = self.next_req.lock().expect("next request poisoned");
                self.queue.fill_backlog(&mut next, self.config.chunk_sec, target, &self.playing);
            }

            let Some(ck) = self.queue.pop_chunk(wait, &self.playing) else {
                if self.is_playing() {
                    log::warn!("No chunk ready after {:?}, stopping", wait);
                    self.events.decoded_event(clock.base_t0, "need chunk");
                }
                break;
            };
            if !ck.valid {
                self.events.decoded_event(clock.base_t0, "need chunk");
                continue;
            }
            if !clock_set {
                clock.rebase(ck.t0);
                clock_set = true;
            }

            let pcm = ck.audio.pcm();
            let frames: Vec<&VideoFrame> = ck.video.iter().filter(|f| f.pts >= ck.t0 - 1e-4).collect();
            let target_end = ck.end().max(ck.last_video_pts().unwrap_or(f64::MIN));

            let mut audio_i = 0;
            let mut video_i = 0;
            let mut last_played = f64::NEG_INFINITY;
            let mut last_progress = Instant::now();

            while self.is_playing() {
                played = clock.played_sec(sink.as_mut());
                if played > last_played + 1e-4 {
                    last_played = played;
                    last_progress = Instant::now();
                }

                let audio_done = audio_i >= pcm.len();
                if audio_done && last_progress.elapsed() >= watchdog {
                    log::warn!(
                        "Audio clock stalled at {:.3}s, flushing {} frames",
                        played,
                        frames.len() - video_i
                    );
                    for frame in &frames[video_i..] {
                        self.present(frame, played, &mut last_presented);
                    }
                    video_i = frames.len();
                    break;
                }

                let idle = sink.state() != SinkState::Running;
                let mut present_until = played + lead;
                if audio_done && idle {
                    if let Some(last) = frames.last() {
                        present_until = present_until.max(last.pts + lead);
                    }
                }
                let mut due = None;
                while video_i < frames.len() && frames[video_i].pts <= present_until {
                    due = Some(frames[video_i]);
                    video_i += 1;
                }
                if let Some(frame) = due {
                    self.present(frame, played, &mut last_presented);
                }

                let mut wrote = false;
                if !audio_done {
                    let resume_at = ck.t0 + audio_i as f64 / sr as f64;
                    match self.write_slice(sink.as_mut(), &mut clock, &pcm[audio_i..], slice, resume_at) {
                        WriteStep::Wrote(n) => {
                            audio_i += n;
                            wrote = n > 0;
                            self.report(played);
                        }
                        WriteStep::Idle => {}
                        WriteStep::Failed => break,
                    }
                }

                if audio_i >= pcm.len()
                    && video_i >= frames.len()
                    && (idle || played >= target_end - 1e-3)
                {
                    break;
                }
                if !wrote {
                    thread::sleep(room_wait(sink.as_mut(), slice));
                }
            }
            self.report(played);

            if ck.end() >= self.end - 1e-9 {
                break;
            }
        }

        if self.is_playing() {
            sink.drain();
        } else {
            sink.drop_pending();
        }
        if let Err(e) = sink.prepare() {
            log::warn!("Failed to prepare audio sink: {}", e);
        }
        self.playing.store(false, Ordering::SeqCst);
        self.events.video_frame(&PresentedFrame::done(played));
        log::debug!("Play session ended at {:.3}s", played);
        sink
    }
}

/// Time for the device to free `slice` frames, at most one slice and at
/// least a millisecond.
fn room_wait(sink: &mut dyn AudioSink, slice: usize) -> Duration {
    let sr = sink.sample_rate().max(1) as f64;
    let missing = slice.saturating_sub(sink.avail().unwrap_or(0)).max(1);
    let one_slice = Duration::from_secs_f64(slice as f64 / sr).max(Duration::from_millis(1));
    Duration::from_secs_f64(missing as f64 / sr).clamp(Duration::from_millis(1), one_slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelSink, MediaEvent};
    use crate::media::source::testing::ScriptedSource;
    use crate::playback::sink::VirtualSink;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::Receiver;

    /// Virtual device that reports one underrun once `glitch_after` frames
    /// have been written.
    struct GlitchSink {
        inner: VirtualSink,
        glitch_after: usize,
        written: usize,
        underruns: Arc<AtomicUsize>,
    }

    impl AudioSink for GlitchSink {
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        fn prepare(&mut self) -> Result<(), SinkError> {
            self.inner.prepare()
        }

        fn avail(&mut self) -> Result<usize, SinkError> {
            if self.written >= self.glitch_after && self.underruns.load(Ordering::SeqCst) == 0 {
                self.underruns.fetch_add(1, Ordering::SeqCst);
                return Err(SinkError::Underrun);
            }
            self.inner.avail()
        }

        fn write(&mut self, frames: &[i16]) -> Result<usize, SinkError> {
            let n = self.inner.write(frames)?;
            self.written += n;
            Ok(n)
        }

        fn delay(&mut self) -> Result<i64, SinkError> {
            self.inner.delay()
        }

        fn state(&mut self) -> SinkState {
            self.inner.state()
        }

        fn recover(&mut self, err: &SinkError) -> Result<(), SinkError> {
            self.inner.recover(err)
        }

        fn drop_pending(&mut self) {
            self.inner.drop_pending()
        }

        fn drain(&mut self) {
            self.inner.drain()
        }
    }

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            chunk_sec: 0.25,
            ..PlaybackConfig::default()
        }
    }

    fn player(source: ScriptedSource, sink: VirtualSink, config: PlaybackConfig) -> (Player, Receiver<MediaEvent>) {
        player_with(source, Box::new(sink), config)
    }

    fn player_with(
        source: ScriptedSource,
        sink: Box<dyn AudioSink>,
        config: PlaybackConfig,
    ) -> (Player, Receiver<MediaEvent>) {
        let hub = EventHub::new();
        let (events, rx) = ChannelSink::new();
        hub.register_media(events);
        (Player::new(Box::new(source), sink, hub, config), rx)
    }

    /// Pixel tags of presented frames and the number of done sentinels.
    fn frames_and_done(rx: &Receiver<MediaEvent>) -> (Vec<u8>, usize, Vec<String>) {
        let mut tags = Vec::new();
        let mut done = 0;
        let mut msgs = Vec::new();
        for event in rx.try_iter() {
            match event {
                MediaEvent::Frame(f) if f.done => done += 1,
                MediaEvent::Frame(f) => tags.push(f.pixels.as_ref().map_or(0, |p| p[0])),
                MediaEvent::Decoded { msg, .. } => msgs.push(msg),
                _ => {}
            }
        }
        (tags, done, msgs)
    }

    #[test]
    fn plays_to_end_with_ordered_frames() {
        let source = ScriptedSource::new(8000, 1.0).with_video(20.0);
        let sink = VirtualSink::new(8000, 200).with_rate(4.0);
        let (mut player, rx) = player(source, sink, config());

        player.play(0.0, 1.0).unwrap();
        player.wait();
        assert!(!player.is_playing());

        let (tags, done, msgs) = frames_and_done(&rx);
        assert_eq!(done, 1);
        assert!(tags.windows(2).all(|w| w[0] < w[1]), "{:?}", tags);
        assert_eq!(tags.last(), Some(&20));
        assert!(msgs.iter().any(|m| m == "end play"));
        assert!(!msgs.iter().any(|m| m == "need chunk"));
        assert!(player.position() > 0.9);
    }

    #[test]
    fn watchdog_flushes_video_on_stalled_device() {
        let source = ScriptedSource::new(8000, 0.5).with_video(20.0);
        let sink = VirtualSink::stalled(8000, 1000);
        let (mut player, rx) = player(source, sink, config());

        let start = Instant::now();
        player.play(0.0, 0.5).unwrap();
        player.wait();
        assert!(start.elapsed() < Duration::from_secs(3));

        let (tags, done, _) = frames_and_done(&rx);
        assert_eq!(done, 1);
        assert_eq!(tags, (1..=10).collect::<Vec<u8>>());
    }

    #[test]
    fn stop_mid_play_sends_done_once() {
        let source = ScriptedSource::new(8000, 10.0);
        let sink = VirtualSink::new(8000, 200);
        let (mut player, rx) = player(source, sink, config());

        player.play(0.0, 10.0).unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(player.is_playing());
        assert!(player.stop(None));
        assert!(!player.is_playing());
        assert_eq!(player.queue().pending_requests(), 0);
        assert_eq!(player.queue().queued_chunks(), 0);
        assert!(player.stop(None));

        let (_, done, _) = frames_and_done(&rx);
        assert_eq!(done, 1);
        assert!(player.position() > 0.0 && player.position() < 1.0);
    }

    #[test]
    fn restarting_stop_swallows_next_stop() {
        let (mut player, _rx) = player(ScriptedSource::new(8000, 3.0), VirtualSink::new(8000, 200), config());
        assert!(player.stop(Some(1.0)));
        assert!(!player.stop(None));
        assert!(player.stop(None));
    }

    #[test]
    fn play_reuses_preloaded_chunks() {
        let source = ScriptedSource::new(8000, 3.0);
        let seeks = Arc::clone(&source.seeks);
        let sink = VirtualSink::new(8000, 200).with_rate(8.0);
        let (mut player, rx) = player(source, sink, config());

        player.pre_load(1.0);
        let deadline = Instant::now() + Duration::from_secs(5);
        while player.queue().queued_chunks() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(player.queue().queued_chunks(), 4);

        player.play(1.0, 1.0).unwrap();
        player.wait();
        assert_eq!(seeks.load(Ordering::SeqCst), 4);
        let (_, done, _) = frames_and_done(&rx);
        assert_eq!(done, 1);
    }

    #[test]
    fn pre_load_publishes_thumbnail() {
        let source = ScriptedSource::new(8000, 3.0).with_video(10.0);
        let (mut player, rx) = player(source, VirtualSink::new(8000, 200), config());
        player.pre_load(0.5);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut thumb = None;
        while thumb.is_none() && Instant::now() < deadline {
            if let Ok(MediaEvent::Thumbnail(frame)) = rx.recv_timeout(Duration::from_millis(20)) {
                thumb = Some(frame);
            }
        }
        let thumb = thumb.expect("thumbnail");
        assert!((thumb.pts - 0.5).abs() < 1e-9);
    }

    #[test]
    fn starved_queue_reports_need_chunk() {
        let source = ScriptedSource::new(8000, 2.0).with_decode_delay(Duration::from_millis(100));
        let cfg = PlaybackConfig {
            chunk_wait_ms: 30,
            ..config()
        };
        let (mut player, rx) = player(source, VirtualSink::new(8000, 200), cfg);
        player.play(0.0, 2.0).unwrap();
        player.wait();
        let (_, done, msgs) = frames_and_done(&rx);
        assert_eq!(done, 1);
        assert!(msgs.iter().any(|m| m == "need chunk"));
    }

    #[test]
    fn underrun_mid_play_rebases_and_continues() {
        let underruns = Arc::new(AtomicUsize::new(0));
        let sink = GlitchSink {
            inner: VirtualSink::new(8000, 200).with_rate(4.0),
            glitch_after: 4000,
            written: 0,
            underruns: Arc::clone(&underruns),
        };
        let (mut player, rx) = player_with(ScriptedSource::new(8000, 1.0), Box::new(sink), config());

        player.play(0.0, 1.0).unwrap();
        player.wait();
        assert_eq!(underruns.load(Ordering::SeqCst), 1);

        let mut played = Vec::new();
        let mut done = 0;
        let mut msgs = Vec::new();
        for event in rx.try_iter() {
            match event {
                MediaEvent::Played(sec) => played.push(sec),
                MediaEvent::Frame(f) if f.done => done += 1,
                MediaEvent::Decoded { msg, .. } => msgs.push(msg),
                _ => {}
            }
        }
        assert_eq!(done, 1);
        assert!(played.windows(2).all(|w| w[1] >= w[0] - 1e-9), "{:?}", played);
        assert!(played.last().copied().unwrap_or(0.0) > 0.9);
        assert!(msgs.iter().any(|m| m == "end play"));
    }

    #[test]
    fn room_wait_tracks_free_space() {
        let mut sink = VirtualSink::stalled(8000, 100);
        assert_eq!(room_wait(&mut sink, 80), Duration::from_millis(1));
        sink.write(&[0; 760]).unwrap();
        assert_eq!(room_wait(&mut sink, 80), Duration::from_secs_f64(40.0 / 8000.0));
        sink.write(&[0; 40]).unwrap();
        assert_eq!(room_wait(&mut sink, 80), Duration::from_secs_f64(80.0 / 8000.0));
    }
}
