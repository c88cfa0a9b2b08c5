//! Track-wide segment index and projection of the visible window to
//! normalized device coordinates.

/// One analysis window of the whole track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentDescriptor {
    pub start_sec: f64,
    pub end_sec: f64,
    pub start_sample: usize,
    pub end_sample: usize,
    /// First STFT frame fully inside the segment.
    pub frame_start: usize,
    /// Number of whole STFT frames in the segment.
    pub frame_size: usize,
}

/// A segment overlapping the viewport, mapped to [-1, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentNdc {
    pub ndc_start: f32,
    pub ndc_end: f32,
    pub segment: SegmentDescriptor,
}

/// Split `[0, total_samples)` into windows of `window_sec` striding by
/// `window * (1 - overlap)`. The final window is clipped to the track end,
/// never padded or moved.
pub fn build_global_segments(
    total_samples: usize,
    sr: u32,
    window_sec: f64,
    overlap: f64,
    n_fft: usize,
    n_hop: usize,
    center: bool,
) -> Vec<SegmentDescriptor> {
    if total_samples == 0 || sr == 0 || n_hop == 0 {
        return Vec::new();
    }
    let win = (window_sec * sr as f64).round();
    let step = (win * (1.0 - overlap)).round();
    if win <= 0.0 || step <= 0.0 {
        return Vec::new();
    }
    let (win, step) = (win as usize, step as usize);

    let count = if total_samples > win {
        ((total_samples - win) as f64 / step as f64).ceil() as usize + 1
    } else {
        1
    };
    let offset = if center { n_fft / 2 } else { 0 };

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let s = i * step;
        if s >= total_samples {
            break;
        }
        let e = (s + win).min(total_samples);
        let len = e - s;
        out.push(SegmentDescriptor {
            start_sec: s as f64 / sr as f64,
            end_sec: e as f64 / sr as f64,
            start_sample: s,
            end_sample: e,
            frame_start: (s + offset) / n_hop,
            frame_size: if len >= n_fft { 1 + (len - n_fft) / n_hop } else { 0 },
        });
    }
    out
}

/// Map a time to NDC across `[view_start, view_start + span]`. Returns -1 for a
/// non-positive span.
pub fn to_ndc(t: f64, view_start: f64, span: f64) -> f32 {
    if span <= 0.0 {
        return -1.0;
    }
    (-1.0 + 2.0 * (t - view_start) / span) as f32
}

/// Segments overlapping `[view_start, view_start + span)` with clamped NDC bounds.
pub fn project_visible_to_ndc(all: &[SegmentDescriptor], view_start: f64, span: f64) -> Vec<SegmentNdc> {
    if all.is_empty() || span <= 0.0 {
        return Vec::new();
    }
    let view_end = view_start + span;
    let first = all.partition_point(|s| s.end_sec <= view_start);

    all[first..]
        .iter()
        .take_while(|s| s.start_sec < view_end)
        .map(|s| SegmentNdc {
            ndc_start: to_ndc(s.start_sec, view_start, span).clamp(-1.0, 1.0),
            ndc_end: to_ndc(s.end_sec, view_start, span).clamp(-1.0, 1.0),
            segment: *s,
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    /// One vertex per sample, drawn connected.
    LineStrip,
    /// Pairs of (min, max) vertices per pixel column.
    Lines,
}

/// Interleaved `(x, y)` vertices ready for upload.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformProjection {
    pub vertices: Vec<f32>,
    pub draw_count: usize,
    pub primitive: Primitive,
}

impl Default for WaveformProjection {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            draw_count: 0,
            primitive: Primitive::LineStrip,
        }
    }
}

/// Fit `samples` to `pixel_width` columns.
///
/// Up to one sample per pixel every sample becomes a vertex. Above that each
/// column gets a min/max pair over `N / pixel_width` samples, the last column
/// absorbing the remainder. Amplitudes are divided by `global_peak` (when
/// positive) and clamped to [-1, 1].
pub fn project_waveform_for_pixels(samples: &[f32], pixel_width: usize, global_peak: f32) -> WaveformProjection {
    if samples.is_empty() || pixel_width == 0 {
        return WaveformProjection::default();
    }
    let n = samples.len();
    let gain = if global_peak > 0.0 { 1.0 / global_peak } else { 1.0 };

    if n <= pixel_width {
        let mut vertices = Vec::with_capacity(n * 2);
        for (i, &s) in samples.iter().enumerate() {
            let t = if n > 1 { i as f32 / (n - 1) as f32 } else { 0.0 };
            vertices.push(t * 2.0 - 1.0);
            vertices.push((s * gain).clamp(-1.0, 1.0));
        }
        return WaveformProjection {
            vertices,
            draw_count: n,
            primitive: Primitive::LineStrip,
        };
    }

    let per_pixel = (n / pixel_width).max(1);
    let mut vertices = Vec::with_capacity(pixel_width * 4);
    for px in 0..pixel_width {
        let s0 = px * per_pixel;
        if s0 >= n {
            break;
        }
        let s1 = if px == pixel_width - 1 { n } else { (s0 + per_pixel).min(n) };
        let (lo, hi) = samples[s0..s1]
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v * gain), hi.max(v * gain)));
        let x = if pixel_width == 1 {
            0.0
        } else {
            px as f32 / (pixel_width - 1) as f32 * 2.0 - 1.0
        };
        vertices.extend_from_slice(&[x, lo.clamp(-1.0, 1.0), x, hi.clamp(-1.0, 1.0)]);
    }
    WaveformProjection {
        draw_count: vertices.len() / 2,
        vertices,
        primitive: Primitive::Lines,
    }
}
