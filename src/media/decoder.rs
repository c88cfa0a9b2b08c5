//! Background worker that decodes fixed-length media chunks on request.
//!
//! Requests are deduplicated by [`chunk_id`] and served FIFO. Every request
//! seeks, flushes and decodes one chunk, so chunks are independent and may be
//! requested in any order. Decoded chunks land in an unbounded FIFO whose
//! depth is held at the backlog target by [`DecoderQueue::fill_backlog`].

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{pcm, resample};
use crate::error::MediaError;
use crate::events::EventHub;

use super::source::{DecodedFrame, MediaSource};
use super::types::{chunk_id, AudioChunk, MediaChunk, VideoFrame};

/// Result of [`DecoderQueue::request_chunk`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Enqueued; carries the request queue length.
    Accepted(usize),
    /// Already queued or being decoded.
    Duplicate,
    /// At or after the current end bound.
    PastEnd,
}

struct Requests {
    times: VecDeque<f64>,
    /// Ids queued or in flight.
    ids: HashSet<i64>,
    end_req: f64,
    /// Bumped on every clear so results of superseded requests are dropped.
    epoch: u64,
    thumbnail: Option<i64>,
}

/// Request and chunk queues shared by the decode worker and the player.
pub struct DecoderQueue {
    requests: Mutex<Requests>,
    request_ready: Condvar,
    chunks: Mutex<VecDeque<MediaChunk>>,
    chunk_ready: Condvar,
    quit: AtomicBool,
    events: Arc<EventHub>,
}

impl DecoderQueue {
    pub fn new(events: Arc<EventHub>) -> Self {
        Self {
            requests: Mutex::new(Requests {
                times: VecDeque::new(),
                ids: HashSet::new(),
                end_req: f64::INFINITY,
                epoch: 0,
                thumbnail: None,
            }),
            request_ready: Condvar::new(),
            chunks: Mutex::new(VecDeque::new()),
            chunk_ready: Condvar::new(),
            quit: AtomicBool::new(false),
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Ask the worker for the chunk starting at `t`.
    pub fn request_chunk(&self, t: f64) -> RequestOutcome {
        let mut req = self.requests.lock().expect("decoder requests poisoned");
        if t >= req.end_req {
            drop(req);
            self.events.decoded_event(t, "REQ_IGN_end_req");
            return RequestOutcome::PastEnd;
        }
        if !req.ids.insert(chunk_id(t)) {
            drop(req);
            self.events.decoded_event(t, "REQ_IGN_dup");
            return RequestOutcome::Duplicate;
        }
        req.times.push_back(t);
        let size = req.times.len();
        drop(req);
        self.request_ready.notify_one();
        self.events.decoded_event(size as f64, "REQ_OK_size");
        RequestOutcome::Accepted(size)
    }

    pub fn set_end_request(&self, end: f64) {
        self.requests.lock().expect("decoder requests poisoned").end_req = end;
    }

    pub fn end_request(&self) -> f64 {
        self.requests.lock().expect("decoder requests poisoned").end_req
    }

    /// Requests queued or being decoded.
    pub fn pending_requests(&self) -> usize {
        self.requests.lock().expect("decoder requests poisoned").ids.len()
    }

    /// Chunks queued plus requests pending, read as one snapshot.
    pub fn backlog(&self) -> usize {
        let req = self.requests.lock().expect("decoder requests poisoned");
        let queued = self.chunks.lock().expect("decoded chunks poisoned").len();
        req.ids.len() + queued
    }

    pub fn queued_chunks(&self) -> usize {
        self.chunks.lock().expect("decoded chunks poisoned").len()
    }

    pub fn front_t0(&self) -> Option<f64> {
        self.chunks
            .lock()
            .expect("decoded chunks poisoned")
            .front()
            .map(|c| c.t0)
    }

    /// Publish the first video frame of the chunk at `t` once it is decoded.
    pub fn want_thumbnail(&self, t: f64) {
        self.requests.lock().expect("decoder requests poisoned").thumbnail = Some(chunk_id(t));
    }

    /// Next decoded chunk. Waits up to `timeout` while `playing` holds.
    pub fn pop_chunk(&self, timeout: Duration, playing: &AtomicBool) -> Option<MediaChunk> {
        let chunks = self.chunks.lock().expect("decoded chunks poisoned");
        let (mut chunks, _) = self
            .chunk_ready
            .wait_timeout_while(chunks, timeout, |q| q.is_empty() && playing.load(Ordering::SeqCst))
            .expect("decoded chunks poisoned");
        if !playing.load(Ordering::SeqCst) {
            return None;
        }
        chunks.pop_front()
    }

    /// Wake anyone blocked in [`pop_chunk`](Self::pop_chunk).
    pub fn notify_chunks(&self) {
        let _guard = self.chunks.lock().expect("decoded chunks poisoned");
        self.chunk_ready.notify_all();
    }

    pub fn clear_requests(&self) {
        let mut req = self.requests.lock().expect("decoder requests poisoned");
        req.times.clear();
        req.ids.clear();
        req.epoch += 1;
    }

    pub fn clear_chunks(&self) {
        self.chunks.lock().expect("decoded chunks poisoned").clear();
    }

    /// Keep `queued + pending` at `target` by requesting chunks from
    /// `next_req` onward, stopping at the end bound.
    pub fn fill_backlog(&self, next_req: &mut f64, chunk_sec: f64, target: usize, playing: &AtomicBool) {
        if chunk_sec <= 0.0 {
            return;
        }
        while playing.load(Ordering::SeqCst) {
            if self.backlog() >= target {
                break;
            }
            if *next_req >= self.end_request() - 1e-9 {
                break;
            }
            self.request_chunk(*next_req);
            *next_req += chunk_sec;
        }
    }

    fn set_quit(&self, quit: bool) {
        self.quit.store(quit, Ordering::SeqCst);
        let _guard = self.requests.lock().expect("decoder requests poisoned");
        self.request_ready.notify_all();
    }

    fn is_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Block for the earliest request; `None` once quit is raised.
    fn next_request(&self) -> Option<(f64, u64)> {
        let req = self.requests.lock().expect("decoder requests poisoned");
        let mut req = self
            .request_ready
            .wait_while(req, |r| r.times.is_empty() && !self.is_quit())
            .expect("decoder requests poisoned");
        if self.is_quit() {
            return None;
        }
        let epoch = req.epoch;
        req.times.pop_front().map(|t| (t, epoch))
    }

    /// Release the id of a finished request and queue its chunk, unless the
    /// queues were cleared while it was decoding.
    fn finish_request(&self, t0: f64, epoch: u64, chunk: Option<MediaChunk>) {
        let mut req = self.requests.lock().expect("decoder requests poisoned");
        if req.epoch != epoch {
            return;
        }
        let id = chunk_id(t0);
        let mut thumb = None;
        if let Some(chunk) = chunk {
            if req.thumbnail == Some(id) {
                req.thumbnail = None;
                thumb = chunk.video.first().cloned();
            }
            self.chunks.lock().expect("decoded chunks poisoned").push_back(chunk);
            self.chunk_ready.notify_all();
        }
        req.ids.remove(&id);
        drop(req);
        if let Some(frame) = thumb {
            self.events.thumbnail(&frame);
            self.events.decoded_event(frame.pts, "thumbnail");
        }
    }
}

/// Decode `[t0, t0 + duration)` from `source`.
///
/// Audio is downmixed, resampled to `target_sr` with a fresh resampler, and
/// trimmed or zero-filled so it starts at `t0` and holds exactly
/// `round(duration * target_sr)` samples. Video frames before `t0` are
/// dropped and collection stops at the first frame at or after the end.
/// `audio_only` skips video entirely. Raising `quit` cuts the read short.
pub fn decode_window(
    source: &mut dyn MediaSource,
    t0: f64,
    duration: f64,
    target_sr: u32,
    audio_only: bool,
    quit: &AtomicBool,
) -> Result<MediaChunk, MediaError> {
    source.seek(t0)?;
    source.flush();

    let end = t0 + duration;
    let mut video_done = audio_only || !source.has_video();
    let mut audio_done = source.audio_sample_rate().is_none();

    let mut video: Vec<VideoFrame> = Vec::new();
    let mut raw: Vec<f32> = Vec::new();
    let mut raw_rate = source.audio_sample_rate().unwrap_or(target_sr);
    let mut first_pts: Option<f64> = None;

    while !(video_done && audio_done) {
        if quit.load(Ordering::SeqCst) {
            break;
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Decode error in chunk at {:.3}s: {}", t0, e);
                break;
            }
        };
        match frame {
            DecodedFrame::Video(frame) => {
                if video_done || frame.pts + 1e-4 < t0 {
                    continue;
                }
                if frame.pts >= end {
                    video_done = true;
                    continue;
                }
                video.push(frame);
            }
            DecodedFrame::Audio(frame) => {
                if audio_done || frame.pts + frame.duration() < t0 - 1e-4 {
                    continue;
                }
                if frame.pts >= end {
                    audio_done = true;
                    continue;
                }
                if first_pts.is_none() {
                    first_pts = Some(frame.pts);
                    raw_rate = frame.sample_rate;
                }
                if frame.pts + frame.duration() >= end - 1e-9 {
                    audio_done = true;
                }
                raw.extend_from_slice(&frame.samples);
            }
        }
    }

    let want = (duration * target_sr as f64).round() as usize;
    let has_audio = !raw.is_empty();
    let mut samples = if has_audio {
        resample(&raw, raw_rate, target_sr).map_err(|e| MediaError::Decode(format!("{:#}", e)))?
    } else {
        Vec::new()
    };
    if let Some(first) = first_pts {
        let offset = ((first - t0) * target_sr as f64).round() as i64;
        if offset < 0 {
            samples.drain(..(-offset as usize).min(samples.len()));
        } else if offset > 0 {
            samples.splice(0..0, std::iter::repeat(0.0).take(offset as usize));
        }
    }
    samples.resize(want, 0.0);

    video.sort_by(|a, b| a.pts.total_cmp(&b.pts));

    Ok(MediaChunk {
        t0,
        duration,
        valid: has_audio || !video.is_empty(),
        audio: AudioChunk {
            t0,
            duration,
            sample_rate: target_sr,
            channels: 1,
            samples: pcm::encode_s16le(&samples),
        },
        video,
    })
}

enum Worker {
    Idle(Box<dyn MediaSource>),
    Running(JoinHandle<Box<dyn MediaSource>>),
    /// The worker panicked and took the source with it.
    Lost,
}

/// Owns a media source and the thread decoding from it.
pub struct ChunkDecoder {
    queue: Arc<DecoderQueue>,
    worker: Worker,
    chunk_sec: f64,
    target_sr: u32,
    duration: Option<f64>,
}

impl ChunkDecoder {
    pub fn new(source: Box<dyn MediaSource>, target_sr: u32, chunk_sec: f64, events: Arc<EventHub>) -> Self {
        let duration = source.duration();
        Self {
            queue: Arc::new(DecoderQueue::new(events)),
            worker: Worker::Idle(source),
            chunk_sec,
            target_sr,
            duration,
        }
    }

    pub fn queue(&self) -> &Arc<DecoderQueue> {
        &self.queue
    }

    pub fn chunk_sec(&self) -> f64 {
        self.chunk_sec
    }

    pub fn target_sr(&self) -> u32 {
        self.target_sr
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn is_running(&self) -> bool {
        matches!(self.worker, Worker::Running(_))
    }

    /// Spawn the worker if it is idle. Clears a previous quit.
    pub fn start(&mut self) {
        self.queue.set_quit(false);
        let source = match std::mem::replace(&mut self.worker, Worker::Lost) {
            Worker::Idle(source) => source,
            other => {
                if matches!(other, Worker::Lost) {
                    log::warn!("Decoder source lost, cannot start");
                }
                self.worker = other;
                return;
            }
        };
        let queue = Arc::clone(&self.queue);
        let (chunk_sec, target_sr) = (self.chunk_sec, self.target_sr);
        let handle = thread::Builder::new()
            .name("chunk-decoder".into())
            .spawn(move || decode_loop(queue, source, chunk_sec, target_sr));
        self.worker = match handle {
            Ok(handle) => Worker::Running(handle),
            Err(e) => {
                log::error!("Failed to spawn decoder thread: {}", e);
                Worker::Lost
            }
        };
    }

    /// Quit and join the worker, then drop all outstanding requests.
    pub fn stop(&mut self) {
        self.queue.set_quit(true);
        match std::mem::replace(&mut self.worker, Worker::Lost) {
            Worker::Running(handle) => {
                self.worker = match handle.join() {
                    Ok(source) => Worker::Idle(source),
                    Err(_) => {
                        log::error!("Decoder thread panicked");
                        Worker::Lost
                    }
                };
            }
            other => self.worker = other,
        }
        self.queue.clear_requests();
    }

    pub fn restart(&mut self) {
        self.stop();
        self.start();
    }
}

impl Drop for ChunkDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_loop(
    queue: Arc<DecoderQueue>,
    mut source: Box<dyn MediaSource>,
    chunk_sec: f64,
    target_sr: u32,
) -> Box<dyn MediaSource> {
    let events = Arc::clone(&queue.events);
    while let Some((t0, epoch)) = queue.next_request() {
        let chunk = match decode_window(source.as_mut(), t0, chunk_sec, target_sr, false, &queue.quit) {
            Ok(chunk) => {
                events.decoded_event(chunk.audio.samples.len() as f64, "got audio chunk");
                events.decoded_event(chunk.video.len() as f64, "got video chunk");
                if chunk.valid {
                    Some(chunk)
                } else {
                    events.decoded_event(t0, "fail");
                    None
                }
            }
            Err(e @ MediaError::Seek { .. }) => {
                log::warn!("{}", e);
                events.decoded_event(t0, "seek_fail");
                None
            }
            Err(e) => {
                log::warn!("Chunk at {:.3}s failed: {}", t0, e);
                events.decoded_event(t0, "fail");
                None
            }
        };
        if queue.is_quit() {
            break;
        }
        queue.finish_request(t0, epoch, chunk);
    }
    events.decoded_event(0.0, "end decode");
    source
}
