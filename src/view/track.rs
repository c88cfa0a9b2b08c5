//! Immutable per-track state shared with the view workers.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::audio::Signal;
use crate::media::{decode_window, MediaSource, SymphoniaSource};
use crate::segment::SegmentDescriptor;

/// Where window samples come from.
#[derive(Clone, Debug)]
pub enum TrackSource {
    /// Fully decoded signal.
    Memory(Arc<Signal>),
    /// Decoded window by window from a file.
    File(PathBuf),
}

/// Everything the workers need about the loaded track. Replaced wholesale
/// on every load; `generation` tells results of different loads apart.
#[derive(Clone, Debug)]
pub struct TrackSnapshot {
    pub generation: u64,
    pub source: TrackSource,
    pub sample_rate: u32,
    pub total_samples: usize,
    pub duration: f64,
    pub segments: Arc<Vec<SegmentDescriptor>>,
    pub global_peak: f32,
}

/// Per-worker window loader. Keeps the file source of the current
/// generation open between jobs.
#[derive(Default)]
pub struct WindowReader {
    open: Option<(u64, Box<dyn MediaSource>)>,
}

impl WindowReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples of `[start, start + duration)` at the snapshot rate.
    pub fn read(&mut self, snap: &TrackSnapshot, start: f64, duration: f64) -> Result<Signal> {
        let path = match &snap.source {
            TrackSource::Memory(signal) => return Ok(signal.window(start, duration)),
            TrackSource::File(path) => path,
        };
        let stale = self.open.as_ref().map_or(true, |(g, _)| *g != snap.generation);
        if stale {
            self.open = Some((snap.generation, open_source(path)?));
        }
        let (_, source) = self.open.as_mut().context("Window source unavailable")?;
        let chunk = decode_window(source.as_mut(), start, duration, snap.sample_rate, true, &AtomicBool::new(false))
            .with_context(|| format!("Failed to decode {:.3}s - {:.3}s", start, start + duration))?;
        Ok(chunk.audio.to_signal())
    }
}

fn open_source(path: &Path) -> Result<Box<dyn MediaSource>> {
    let source = SymphoniaSource::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    Ok(Box::new(source))
}
