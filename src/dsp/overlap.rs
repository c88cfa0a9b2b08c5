use rayon::prelude::*;
use serde::Deserialize;

use super::db::{db_to_unit, floor_db, power_to_db, DbScale, DB_FLOOR};
use super::matrix::Matrix;
use super::mel::mel_filterbank;
use super::stft::{stft_power, StftParams};
use super::tile::{build_tile, Spectrogram, SpectrogramTile};

/// Parameters for the overlapped long-signal spectrogram.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OverlapParams {
    pub n_fft: usize,
    pub n_hop: usize,
    pub n_mels: usize,
    pub fmin: f32,
    /// `<= 0` or above Nyquist means Nyquist.
    pub fmax: f32,
    pub segment_sec: f32,
    /// Fraction of each segment shared with the next, clamped to [0, 0.99].
    pub overlap: f32,
    /// Map the dB output to [0, 1].
    pub to_unit: bool,
}

impl Default for OverlapParams {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            n_hop: 256,
            n_mels: 128,
            fmin: 0.0,
            fmax: -1.0,
            segment_sec: 0.5,
            overlap: 0.5,
            to_unit: true,
        }
    }
}

/// Analysis spans of `segment` samples striding by `hop`. The last span is
/// moved so it ends exactly at `total`. Empty when the signal is shorter than
/// one segment.
pub fn analysis_spans(total: usize, segment: usize, hop: usize) -> Vec<(usize, usize)> {
    if segment == 0 || hop == 0 || total < segment {
        return Vec::new();
    }
    let mut spans = Vec::new();
    let mut start = 0;
    while start + segment <= total {
        spans.push((start, start + segment));
        start += hop;
    }
    let last_start = total - segment;
    if spans.last().map_or(true, |&(s, _)| s < last_start) {
        spans.push((last_start, total));
    }
    spans
}

/// Overlap-average equally shaped chunks placed `hop_frames` columns apart.
pub fn combine_chunks(chunks: &[Matrix], hop_frames: usize) -> Matrix {
    let Some(first) = chunks.first() else {
        return Matrix::default();
    };
    let bins = first.rows;
    let frames_per_chunk = first.cols;
    let total_frames = hop_frames * (chunks.len() - 1) + frames_per_chunk;

    let mut acc = Matrix::zeros(bins, total_frames);
    let mut count = vec![0u32; total_frames];
    for (i, chunk) in chunks.iter().enumerate() {
        let offset = i * hop_frames;
        let cols = chunk.cols.min(total_frames.saturating_sub(offset));
        let rows = chunk.rows.min(bins);
        for f in 0..cols {
            for b in 0..rows {
                acc[(b, offset + f)] += chunk[(b, f)];
            }
            count[offset + f] += 1;
        }
    }
    for b in 0..bins {
        for (v, &n) in acc.row_mut(b).iter_mut().zip(&count) {
            if n > 0 {
                *v /= n as f32;
            }
        }
    }
    acc
}

fn finish(combined: Matrix, hop_frames: usize, frames_per_chunk: usize) -> SpectrogramTile {
    if combined.is_empty() {
        return SpectrogramTile::default();
    }
    let tile = build_tile(&combined);
    if tile.data.len() != tile.width * tile.height {
        return SpectrogramTile::default();
    }
    SpectrogramTile {
        spec: Spectrogram::from_matrix(&combined),
        tile,
        hop_frames,
        frames_per_chunk,
    }
}

fn hop_samples(segment: usize, overlap: f32) -> usize {
    ((segment as f32 * (1.0 - overlap)).round() as usize).max(1)
}

fn hop_frames(hop_samples: usize, n_hop: usize) -> usize {
    ((hop_samples as f64 / n_hop as f64).round() as usize).max(1)
}

/// Sliding-window mel spectrogram of a long signal.
///
/// Each span is analysed independently (centered hann STFT, mel projection,
/// power to dB, floored at -80 dB), then all spans are overlap-averaged in
/// the frame domain. Returns an empty tile on invalid parameters, on a
/// signal shorter than one segment, or when chunk bin counts disagree.
pub fn load_mel_overlap(samples: &[f32], sr: u32, params: &OverlapParams) -> SpectrogramTile {
    let OverlapParams {
        n_fft,
        n_hop,
        n_mels,
        ..
    } = *params;
    if sr == 0 || n_fft == 0 || n_hop == 0 || n_mels == 0 || params.segment_sec <= 0.0 {
        log::debug!("mel overlap: invalid parameters sr={} n_fft={} n_hop={} n_mels={}", sr, n_fft, n_hop, n_mels);
        return SpectrogramTile::default();
    }
    let nyquist = sr as f32 / 2.0;
    let fmin = params.fmin.max(0.0);
    let fmax = if params.fmax <= 0.0 || params.fmax > nyquist {
        nyquist
    } else {
        params.fmax
    };
    let overlap = if params.overlap >= 1.0 {
        0.99
    } else {
        params.overlap.max(0.0)
    };

    let segment = (sr as f32 * params.segment_sec).floor() as usize;
    if segment < n_fft {
        log::debug!("mel overlap: segment {} shorter than n_fft {}", segment, n_fft);
        return SpectrogramTile::default();
    }
    let hop_samples = hop_samples(segment, overlap);
    let hop_frames = hop_frames(hop_samples, n_hop);
    let bins = n_fft / 2 + 1;

    let fb = mel_filterbank(sr, n_fft, n_mels, fmin, fmax, false);
    if fb.rows != n_mels || fb.cols != bins {
        log::error!("mel filterbank shape {}x{}, expected {}x{}", fb.rows, fb.cols, n_mels, bins);
        return SpectrogramTile::default();
    }

    let spans = analysis_spans(samples.len(), segment, hop_samples);
    if spans.is_empty() {
        return SpectrogramTile::default();
    }

    let stft_params = StftParams::new(n_fft, n_hop);
    let powers: Vec<Matrix> = spans
        .par_iter()
        .map(|&(start, end)| stft_power(&samples[start..end], &stft_params))
        .collect();

    let mut chunks = Vec::with_capacity(powers.len());
    let mut locked_frames = None;
    for (power, &(start, end)) in powers.iter().zip(&spans) {
        if power.rows != bins {
            log::error!("stft bins {} != expected {} for span {}..{}", power.rows, bins, start, end);
            return SpectrogramTile::default();
        }
        let expected = *locked_frames.get_or_insert(power.cols);
        if power.cols != expected {
            log::warn!("chunk frames {} != expected {} for span {}..{}", power.cols, expected, start, end);
        }

        let Some(mel) = fb.matmul(power) else {
            return SpectrogramTile::default();
        };
        let mut db = power_to_db(&mel, &DbScale::default());
        floor_db(&mut db, DB_FLOOR);
        let chunk = if params.to_unit {
            db_to_unit(&db, DB_FLOOR, 0.0)
        } else {
            db
        };
        if chunk.rows != n_mels {
            log::error!("mel chunk bins {} != expected {}", chunk.rows, n_mels);
            return SpectrogramTile::default();
        }
        chunks.push(chunk);
    }

    let frames_per_chunk = chunks[0].cols;
    log::debug!(
        "mel overlap: seg={} hop_samples={} chunks={} frames/chunk={} hop_frames={}",
        segment,
        hop_samples,
        chunks.len(),
        frames_per_chunk,
        hop_frames
    );
    finish(combine_chunks(&chunks, hop_frames), hop_frames, frames_per_chunk)
}

/// Sliding-window linear-frequency spectrogram, unit-scaled over [-80, 0] dB.
///
/// Segments are trimmed to a whole number of uncentered STFT frames so every
/// chunk has the same width.
pub fn load_stft_overlap(samples: &[f32], sr: u32, params: &OverlapParams) -> SpectrogramTile {
    let (n_fft, n_hop) = (params.n_fft, params.n_hop);
    if sr == 0 || n_fft == 0 || n_hop == 0 || params.segment_sec <= 0.0 {
        return SpectrogramTile::default();
    }
    let segment = (sr as f32 * params.segment_sec).floor() as usize;
    if segment < n_fft {
        return SpectrogramTile::default();
    }
    let overlap = params.overlap.clamp(0.0, 0.99);
    let hop_samples = hop_samples(segment, overlap);
    let frames_per_chunk = 1 + (segment - n_fft) / n_hop;
    let effective = (frames_per_chunk - 1) * n_hop + n_fft;
    let hop_frames = hop_frames(hop_samples, n_hop);

    let spans = analysis_spans(samples.len(), effective, hop_samples);
    if spans.is_empty() {
        return SpectrogramTile::default();
    }

    let stft_params = StftParams::new(n_fft, n_hop).center(false);
    let chunks: Vec<Matrix> = spans
        .par_iter()
        .map(|&(start, end)| {
            let power = stft_power(&samples[start..end], &stft_params);
            let mut db = power_to_db(&power, &DbScale::default());
            floor_db(&mut db, DB_FLOOR);
            let mut unit = db_to_unit(&db, DB_FLOOR, 0.0);
            unit.map_inplace(|v| if v.is_finite() { v } else { 0.0 });
            unit
        })
        .collect();

    if chunks.iter().any(|c| c.cols != frames_per_chunk) {
        log::warn!("stft overlap: chunk width differs from {}", frames_per_chunk);
    }
    let frames_per_chunk = chunks[0].cols;
    finish(combine_chunks(&chunks, hop_frames), hop_frames, frames_per_chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(seconds: f32, sr: u32) -> Vec<f32> {
        let n = (seconds * sr as f32) as usize;
        let mut seed = 0x2545_f491u32;
        (0..n)
            .map(|i| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                let noise = (seed as f32 / u32::MAX as f32 - 0.5) * 0.05;
                let t = i as f32 / sr as f32;
                0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() + noise
            })
            .collect()
    }

    #[test]
    fn spans_snap_tail_to_end() {
        for total in [1000, 1001, 1249, 1250, 1499, 5003] {
            let spans = analysis_spans(total, 500, 250);
            assert_eq!(spans.last().unwrap().1, total);
            assert!(spans.iter().all(|&(s, e)| e - s == 500));
        }
        // already aligned: no duplicate tail span
        assert_eq!(analysis_spans(1000, 500, 250).len(), 3);
        assert!(analysis_spans(499, 500, 250).is_empty());
    }

    #[test]
    fn combine_averages_overlaps() {
        let a = Matrix::from_flat(1, 4, vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        let b = Matrix::from_flat(1, 4, vec![3.0, 3.0, 3.0, 3.0]).unwrap();
        let out = combine_chunks(&[a, b], 2);
        assert_eq!(out.cols, 6);
        assert_eq!(out.data, vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn constant_signal_stitches_without_drift() {
        let sr = 8000;
        let params = OverlapParams {
            n_fft: 256,
            n_hop: 64,
            n_mels: 32,
            ..OverlapParams::default()
        };
        let single = load_mel_overlap(&vec![0.25; 4000], sr, &params);
        let long = load_mel_overlap(&vec![0.25; 8000 * 3 + 123], sr, &params);
        assert!(!single.is_empty() && !long.is_empty());
        assert_eq!(single.spec.height, long.spec.height);
        assert!(long.spec.width > single.spec.width);

        for r in 0..long.spec.height {
            let expected = single.spec.data[r * single.spec.width];
            for c in 0..long.spec.width {
                let got = long.spec.data[r * long.spec.width + c];
                assert!((got - expected).abs() < 1e-4, "row {} col {}: {} vs {}", r, c, got, expected);
            }
        }

        let stft_single = load_stft_overlap(&vec![0.25; 4000], sr, &params);
        let stft_long = load_stft_overlap(&vec![0.25; 8000 * 2], sr, &params);
        for r in 0..stft_long.spec.height {
            let expected = stft_single.spec.data[r * stft_single.spec.width];
            for c in 0..stft_long.spec.width {
                let got = stft_long.spec.data[r * stft_long.spec.width + c];
                assert!((got - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn width_follows_span_layout() {
        let sr = 22050;
        let x = tone(2.3, sr);
        let params = OverlapParams::default();
        let out = load_mel_overlap(&x, sr, &params);
        let segment = (sr as f32 * 0.5).floor() as usize;
        let hop = hop_samples(segment, 0.5);
        let spans = analysis_spans(x.len(), segment, hop);
        assert_eq!(spans.last().unwrap().1, x.len());
        assert_eq!(out.frames_per_chunk, 1 + segment / 256);
        assert_eq!(out.hop_frames, hop_frames(hop, 256));
        assert_eq!(out.spec.width, out.hop_frames * (spans.len() - 1) + out.frames_per_chunk);
        assert_eq!(out.tile.width, out.spec.width * 10);
    }

    #[test]
    fn ten_second_track_end_to_end() {
        let sr = 22050;
        let x = tone(10.0, sr);
        let out = load_mel_overlap(&x, sr, &OverlapParams::default());
        assert!(out.spec.width > 0);
        assert_eq!(out.spec.height, 128);
        assert_eq!(out.spec.data.len(), out.spec.width * out.spec.height);
        assert!(out.spec.data.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
    }

    #[test]
    fn db_output_is_floored() {
        let sr = 22050;
        let params = OverlapParams {
            to_unit: false,
            ..OverlapParams::default()
        };
        let out = load_mel_overlap(&tone(1.2, sr), sr, &params);
        assert!(out.spec.data.iter().all(|v| (-80.0..=0.0).contains(v)));
        // silence never produces NaN
        let silent = load_mel_overlap(&vec![0.0; sr as usize], sr, &params);
        assert!(silent.spec.data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn invalid_inputs_are_empty() {
        let x = vec![0.1; 10_000];
        assert!(load_mel_overlap(&x, 0, &OverlapParams::default()).is_empty());
        let zero_hop = OverlapParams {
            n_hop: 0,
            ..OverlapParams::default()
        };
        assert!(load_mel_overlap(&x, 22050, &zero_hop).is_empty());
        let tiny_segment = OverlapParams {
            segment_sec: 0.01,
            ..OverlapParams::default()
        };
        assert!(load_mel_overlap(&x, 22050, &tiny_segment).is_empty());
        // shorter than one segment
        assert!(load_mel_overlap(&x[..5000], 22050, &OverlapParams::default()).is_empty());
    }
}
