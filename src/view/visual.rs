//! Visible-window rendering: waveform vertices or a stitched spectrogram.

use crate::audio::Signal;
use crate::config::ViewMode;
use crate::dsp::{load_mel_overlap, load_stft_overlap, OverlapParams, SpectrogramTile};
use crate::segment::{project_visible_to_ndc, project_waveform_for_pixels, SegmentNdc, WaveformProjection};

use super::track::TrackSnapshot;

#[derive(Clone, Debug)]
pub enum VisualOutput {
    Waveform(WaveformProjection),
    Spectrogram(SpectrogramTile),
}

/// One published visual result.
#[derive(Clone, Debug)]
pub struct VisualFrame {
    pub generation: u64,
    pub start_sec: f64,
    pub span_sec: f64,
    pub mode: ViewMode,
    pub segments: Vec<SegmentNdc>,
    pub output: VisualOutput,
}

/// Render `signal` (the window at `start`) for `mode`. `None` when the
/// window is shorter than one FFT or the spectrogram comes out empty.
pub fn render_window(
    snap: &TrackSnapshot,
    signal: &Signal,
    start: f64,
    span: f64,
    mode: ViewMode,
    pixel_width: usize,
    params: &OverlapParams,
) -> Option<VisualFrame> {
    if signal.samples.len() < params.n_fft {
        log::debug!("Window at {:.3}s too short to render", start);
        return None;
    }
    let output = match mode {
        ViewMode::Waveform => VisualOutput::Waveform(project_waveform_for_pixels(
            &signal.samples,
            pixel_width,
            snap.global_peak,
        )),
        ViewMode::Mel => VisualOutput::Spectrogram(load_mel_overlap(&signal.samples, signal.sample_rate, params)),
        ViewMode::Stft => VisualOutput::Spectrogram(load_stft_overlap(&signal.samples, signal.sample_rate, params)),
    };
    if matches!(&output, VisualOutput::Spectrogram(tile) if tile.is_empty()) {
        return None;
    }
    Some(VisualFrame {
        generation: snap.generation,
        start_sec: start,
        span_sec: span,
        mode,
        segments: project_visible_to_ndc(&snap.segments, start, span),
        output,
    })
}
