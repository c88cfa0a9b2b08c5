//! View controller: owns the loaded track and drives the visual, label and
//! remote-label workers.

use anyhow::{Context, Result};
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::audio::{self, Signal};
use crate::config::{SpectralConfig, ViewConfig, ViewMode};
use crate::events::{MediaSink, WsSink};
use crate::media::{MediaSource, SymphoniaSource};
use crate::remote::parse_job_done;
use crate::segment::build_global_segments;

use super::job::{LatestJob, Worker};
use super::labels::{visible_labels, AudioLabel, VisibleLabels};
use super::remote::{announce_window, remote_params, upload_window, RemoteLink};
use super::track::{TrackSnapshot, TrackSource, WindowReader};
use super::visual::{render_window, VisualFrame};

#[derive(Clone, Copy, Debug, PartialEq)]
struct ViewJob {
    generation: u64,
    start: f64,
}

/// Sent to subscribers whenever a worker publishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewUpdate {
    Visual(u64),
    Labels(u64),
}

struct ViewState {
    start: f64,
    mode: ViewMode,
    pixel_width: usize,
}

/// State shared between the controller, its workers and the event hub.
pub struct ViewCore {
    track: Mutex<Option<Arc<TrackSnapshot>>>,
    generation: AtomicU64,
    state: Mutex<ViewState>,
    labels: Mutex<Vec<AudioLabel>>,
    visible: Mutex<Arc<VisibleLabels>>,
    visual: Mutex<Option<Arc<VisualFrame>>>,
    remote_next: Mutex<f64>,
    remote_generation: AtomicU64,
    updates: Mutex<Vec<Sender<ViewUpdate>>>,
    visual_jobs: Arc<LatestJob<ViewJob>>,
    label_jobs: Arc<LatestJob<ViewJob>>,
    remote_jobs: Option<Arc<LatestJob<ViewJob>>>,
    view: ViewConfig,
    spectral: SpectralConfig,
}

impl ViewCore {
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<Arc<TrackSnapshot>> {
        self.track.lock().expect("track poisoned").clone()
    }

    /// Start of the visible window.
    pub fn window_start(&self) -> f64 {
        self.state.lock().expect("view state poisoned").start
    }

    pub fn viewport_sec(&self) -> f64 {
        self.view.viewport_sec
    }

    pub fn latest_visual(&self) -> Option<Arc<VisualFrame>> {
        self.visual.lock().expect("visual result poisoned").clone()
    }

    pub fn visible_labels(&self) -> Arc<VisibleLabels> {
        Arc::clone(&self.visible.lock().expect("visible labels poisoned"))
    }

    pub fn labels(&self) -> Vec<AudioLabel> {
        self.labels.lock().expect("labels poisoned").clone()
    }

    /// Where the next remote labeling round starts.
    pub fn remote_position(&self) -> f64 {
        *self.remote_next.lock().expect("remote pointer poisoned")
    }

    pub fn subscribe(&self) -> Receiver<ViewUpdate> {
        let (tx, rx) = mpsc::channel();
        self.updates.lock().expect("subscribers poisoned").push(tx);
        rx
    }

    fn notify(&self, update: ViewUpdate) {
        self.updates
            .lock()
            .expect("subscribers poisoned")
            .retain(|tx| tx.send(update).is_ok());
    }

    /// Load a file. Windows are decoded on demand when the container
    /// reports its length, otherwise the whole track is decoded up front.
    pub fn load_track(&self, path: &Path) -> Result<u64> {
        let source = SymphoniaSource::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let sample_rate = self.view.target_sr;
        let Some(duration) = source.duration() else {
            let signal = audio::load(path, Some(sample_rate), 0.0, None)?;
            return Ok(self.load_signal(signal));
        };
        let total = (duration * sample_rate as f64).round() as usize;
        log::info!("Loaded {} ({:.1}s)", path.display(), duration);
        Ok(self.install(
            TrackSource::File(path.to_path_buf()),
            sample_rate,
            total,
            self.view.global_peak,
        ))
    }

    pub fn load_signal(&self, signal: Signal) -> u64 {
        let (sample_rate, total) = (signal.sample_rate, signal.samples.len());
        let peak = signal.peak();
        self.install(TrackSource::Memory(Arc::new(signal)), sample_rate, total, peak)
    }

    fn install(&self, source: TrackSource, sample_rate: u32, total_samples: usize, global_peak: f32) -> u64 {
        let segments = build_global_segments(
            total_samples,
            sample_rate,
            self.spectral.segment_sec,
            self.spectral.overlap,
            self.spectral.n_fft,
            self.spectral.n_hop,
            true,
        );
        let duration = if sample_rate > 0 {
            total_samples as f64 / sample_rate as f64
        } else {
            0.0
        };

        let generation = {
            let mut visual = self.visual.lock().expect("visual result poisoned");
            let mut visible = self.visible.lock().expect("visible labels poisoned");
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *self.track.lock().expect("track poisoned") = Some(Arc::new(TrackSnapshot {
                generation,
                source,
                sample_rate,
                total_samples,
                duration,
                segments: Arc::new(segments),
                global_peak,
            }));
            self.labels.lock().expect("labels poisoned").clear();
            *visual = None;
            *visible = Arc::new(VisibleLabels {
                generation,
                ..VisibleLabels::default()
            });
            generation
        };
        *self.remote_next.lock().expect("remote pointer poisoned") = 0.0;
        log::debug!("Track generation {}: {} samples at {}Hz", generation, total_samples, sample_rate);

        self.request_window(0.0);
        if let Some(remote) = &self.remote_jobs {
            remote.send(ViewJob { generation, start: 0.0 });
        }
        generation
    }

    /// Move the viewport to `start`, clamped so the window stays inside the
    /// track, and schedule both visual and label refreshes.
    pub fn request_window(&self, start: f64) {
        let Some(snap) = self.snapshot() else {
            return;
        };
        let max_start = (snap.duration - self.view.viewport_sec).max(0.0);
        let start = start.clamp(0.0, max_start);
        self.state.lock().expect("view state poisoned").start = start;
        let job = ViewJob {
            generation: snap.generation,
            start,
        };
        self.visual_jobs.send(job);
        self.label_jobs.send(job);
    }

    pub fn set_viewport_window(&self, start: f64) {
        self.request_window(start);
    }

    pub fn set_view_mode(&self, mode: ViewMode) {
        self.state.lock().expect("view state poisoned").mode = mode;
        self.request_window(self.window_start());
    }

    pub fn set_pixel_width(&self, pixel_width: usize) {
        self.state.lock().expect("view state poisoned").pixel_width = pixel_width;
        self.request_window(self.window_start());
    }

    /// Merge labels into the current track and refresh the visible set.
    pub fn add_labels(&self, labels: Vec<AudioLabel>) {
        self.labels.lock().expect("labels poisoned").extend(labels);
        self.label_jobs.send(ViewJob {
            generation: self.generation(),
            start: self.window_start(),
        });
    }

    fn run_visual(&self, reader: &mut WindowReader, job: ViewJob) {
        let Some(snap) = self.snapshot().filter(|s| s.generation == job.generation) else {
            return;
        };
        let (mode, pixel_width) = {
            let state = self.state.lock().expect("view state poisoned");
            (state.mode, state.pixel_width)
        };
        let span = self.view.viewport_sec;
        let signal = match reader.read(&snap, job.start, span) {
            Ok(signal) => signal,
            Err(e) => {
                log::warn!("View window at {:.3}s: {:#}", job.start, e);
                return;
            }
        };
        let params = self.spectral.overlap_params();
        let Some(frame) = render_window(&snap, &signal, job.start, span, mode, pixel_width, &params) else {
            return;
        };

        let mut slot = self.visual.lock().expect("visual result poisoned");
        if self.generation() != job.generation {
            log::debug!("Discarding visual result of generation {}", job.generation);
            return;
        }
        *slot = Some(Arc::new(frame));
        drop(slot);
        self.notify(ViewUpdate::Visual(job.generation));
    }

    fn run_labels(&self, job: ViewJob) {
        if self.generation() != job.generation {
            return;
        }
        let all = self.labels();
        let labels = visible_labels(&all, job.start, self.view.viewport_sec);

        let mut slot = self.visible.lock().expect("visible labels poisoned");
        if self.generation() != job.generation {
            return;
        }
        *slot = Arc::new(VisibleLabels {
            generation: job.generation,
            start_sec: job.start,
            labels,
        });
        drop(slot);
        self.notify(ViewUpdate::Labels(job.generation));
    }

    fn run_remote(&self, reader: &mut WindowReader, link: &RemoteLink, job: ViewJob) {
        let Some(snap) = self.snapshot().filter(|s| s.generation == job.generation) else {
            return;
        };
        let next = job.start + link.window_sec;
        let uploaded = upload_window(link, reader, &snap, job.start, &remote_params(&self.spectral));
        // replies may arrive as soon as the request is out
        *self.remote_next.lock().expect("remote pointer poisoned") = next;
        self.remote_generation.store(job.generation, Ordering::SeqCst);

        match uploaded {
            Some(window) => {
                announce_window(link, job.start, window);
            }
            None if next < snap.duration => {
                log::debug!("Skipping remote window at {:.3}s", job.start);
                if let Some(remote) = &self.remote_jobs {
                    remote.send(ViewJob {
                        generation: job.generation,
                        start: next,
                    });
                }
            }
            None => {}
        }
    }
}

impl MediaSink for ViewCore {
    /// Follow playback: jump the viewport once the position leaves it.
    fn on_played_sec(&self, sec: f64) {
        let start = self.window_start();
        if sec < start || sec > start + self.view.viewport_sec {
            self.request_window(sec.floor());
        }
    }
}

impl WsSink for ViewCore {
    fn on_ws_message(&self, text: &str) {
        let Some(spans) = parse_job_done(text) else {
            return;
        };
        let generation = self.generation();
        if self.remote_jobs.is_some() && self.remote_generation.load(Ordering::SeqCst) != generation {
            log::debug!("Dropping labels for a previous track");
            return;
        }
        log::debug!("Received {} labels", spans.len());
        self.add_labels(spans.into_iter().map(AudioLabel::from).collect());

        let Some(remote) = &self.remote_jobs else {
            return;
        };
        let next = *self.remote_next.lock().expect("remote pointer poisoned");
        if self.snapshot().is_some_and(|s| next < s.duration) {
            remote.send(ViewJob { generation, start: next });
        }
    }
}

/// Owns the workers; dereferences to the shared [`ViewCore`].
pub struct ViewPipeline {
    core: Arc<ViewCore>,
    _visual: Worker<ViewJob>,
    _labels: Worker<ViewJob>,
    _remote: Option<Worker<ViewJob>>,
}

impl ViewPipeline {
    pub fn new(view: ViewConfig, spectral: SpectralConfig, remote: Option<RemoteLink>) -> Self {
        let visual_jobs = Arc::new(LatestJob::new());
        let label_jobs = Arc::new(LatestJob::new());
        let remote_jobs = remote.as_ref().map(|_| Arc::new(LatestJob::new()));

        let core = Arc::new(ViewCore {
            track: Mutex::new(None),
            generation: AtomicU64::new(0),
            state: Mutex::new(ViewState {
                start: 0.0,
                mode: view.mode,
                pixel_width: view.pixel_width,
            }),
            labels: Mutex::new(Vec::new()),
            visible: Mutex::new(Arc::new(VisibleLabels::default())),
            visual: Mutex::new(None),
            remote_next: Mutex::new(0.0),
            remote_generation: AtomicU64::new(0),
            updates: Mutex::new(Vec::new()),
            visual_jobs: Arc::clone(&visual_jobs),
            label_jobs: Arc::clone(&label_jobs),
            remote_jobs: remote_jobs.clone(),
            view,
            spectral,
        });

        let visual = {
            let core = Arc::clone(&core);
            let mut reader = WindowReader::new();
            Worker::spawn("view-visual", visual_jobs, move |job| core.run_visual(&mut reader, job))
        };
        let labels = {
            let core = Arc::clone(&core);
            Worker::spawn("view-labels", label_jobs, move |job| core.run_labels(job))
        };
        let remote = remote.zip(remote_jobs).map(|(link, jobs)| {
            let core = Arc::clone(&core);
            let mut reader = WindowReader::new();
            Worker::spawn("view-remote", jobs, move |job| core.run_remote(&mut reader, &link, job))
        });

        Self {
            core,
            _visual: visual,
            _labels: labels,
            _remote: remote,
        }
    }

    /// Shared core, for registering with an event hub.
    pub fn core(&self) -> &Arc<ViewCore> {
        &self.core
    }
}

impl Deref for ViewPipeline {
    type Target = ViewCore;

    fn deref(&self) -> &ViewCore {
        &self.core
    }
}
