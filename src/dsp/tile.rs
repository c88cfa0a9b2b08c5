use super::db::DB_FLOOR;
use super::matrix::Matrix;
use super::mel::mel_filterbank;
use super::stft::{stft, StftParams};

/// Pixels per spectrogram cell in each direction of the magnified tile.
pub const TILE_MAGNIFY: usize = 10;

/// Flat row-major float image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spectrogram {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Spectrogram {
    pub fn from_matrix(m: &Matrix) -> Self {
        Self {
            width: m.cols,
            height: m.rows,
            data: m.data.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A computed spectrogram plus its magnified raster.
///
/// `hop_frames` and `frames_per_chunk` describe how overlapped analysis chunks
/// were stitched; both are zero for single-pass spectrograms.
#[derive(Clone, Debug, Default)]
pub struct SpectrogramTile {
    pub spec: Spectrogram,
    pub tile: Spectrogram,
    pub hop_frames: usize,
    pub frames_per_chunk: usize,
}

impl SpectrogramTile {
    pub fn is_empty(&self) -> bool {
        self.spec.is_empty()
    }

    pub fn from_matrix(m: &Matrix) -> Self {
        Self {
            spec: Spectrogram::from_matrix(m),
            tile: build_tile(m),
            hop_frames: 0,
            frames_per_chunk: 0,
        }
    }
}

/// Nearest-neighbour upscale by [`TILE_MAGNIFY`] in both directions.
pub fn build_tile(m: &Matrix) -> Spectrogram {
    let width = m.cols * TILE_MAGNIFY;
    let height = m.rows * TILE_MAGNIFY;
    let mut data = Vec::with_capacity(width * height);
    for r in 0..m.rows {
        let mut line = Vec::with_capacity(width);
        for &v in m.row(r) {
            line.extend(std::iter::repeat(v).take(TILE_MAGNIFY));
        }
        for _ in 0..TILE_MAGNIFY {
            data.extend_from_slice(&line);
        }
    }
    Spectrogram {
        width,
        height,
        data,
    }
}

fn log_clamp_unit(m: &mut Matrix, min_db: f32) {
    m.map_inplace(|v| {
        let db = 10.0 * (v + 1e-5).log10();
        (db.clamp(min_db, 0.0) - min_db) / -min_db
    });
}

/// Single-pass linear-frequency spectrogram of the whole buffer, unit-scaled over [-60, 0] dB.
pub fn load_stft(samples: &[f32], sr: u32, n_fft: usize, n_hop: usize) -> SpectrogramTile {
    if sr == 0 {
        return SpectrogramTile::default();
    }
    let mut mag = stft(samples, &StftParams::new(n_fft, n_hop)).magnitude();
    if mag.is_empty() {
        return SpectrogramTile::default();
    }
    log_clamp_unit(&mut mag, -60.0);
    SpectrogramTile::from_matrix(&mag)
}

/// Single-pass mel spectrogram of the whole buffer, unit-scaled over [-80, 0] dB.
pub fn load_mel_spec(
    samples: &[f32],
    sr: u32,
    n_fft: usize,
    n_hop: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> SpectrogramTile {
    let fb = mel_filterbank(sr, n_fft, n_mels, fmin, fmax, false);
    let mag = stft(samples, &StftParams::new(n_fft, n_hop)).magnitude();
    let Some(mut mel) = fb.matmul(&mag).filter(|m| !m.is_empty()) else {
        return SpectrogramTile::default();
    };
    log_clamp_unit(&mut mel, DB_FLOOR);
    SpectrogramTile::from_matrix(&mel)
}

/// 8-bit grayscale image, row-major, row 0 at the top.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ByteImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

/// Quantize a flat `height x width` matrix to bytes and flip it vertically so
/// low frequencies end up at the bottom. With `is_db` the input is first mapped
/// from [-80, 0] dB to [0, 1].
pub fn flat_matrix_to_byte_image(flat: &[f32], height: usize, width: usize, is_db: bool) -> ByteImage {
    if height == 0 || width == 0 || flat.len() != height * width {
        return ByteImage::default();
    }
    let mut data = Vec::with_capacity(flat.len());
    for row in flat.chunks_exact(width).rev() {
        data.extend(row.iter().map(|&v| {
            let v = if is_db {
                ((v - DB_FLOOR) / -DB_FLOOR).clamp(0.0, 1.0)
            } else {
                v
            };
            (v * 255.0).round().clamp(0.0, 255.0) as u8
        }));
    }
    ByteImage {
        width,
        height,
        data,
    }
}

/// Copy columns `[start_frame, start_frame + frame_size)` out of a flat
/// `height x full_width` matrix. Columns past the source are zero.
pub fn extract_spectrogram_slice(
    full: &[f32],
    full_width: usize,
    height: usize,
    start_frame: usize,
    frame_size: usize,
) -> Vec<f32> {
    let mut slice = vec![0.0; height * frame_size];
    if full.len() < full_width * height {
        return slice;
    }
    let available = full_width.saturating_sub(start_frame).min(frame_size);
    if available == 0 {
        return slice;
    }
    for row in 0..height {
        let src = row * full_width + start_frame;
        let dst = row * frame_size;
        slice[dst..dst + available].copy_from_slice(&full[src..src + available]);
    }
    slice
}

/// Hop that yields about `target_width` frames for `t_sec` seconds of audio.
pub fn choose_hop_for_width(sr: u32, t_sec: f64, n_fft: usize, target_width: usize, center: bool) -> usize {
    if target_width <= 1 {
        return n_fft.max(1);
    }
    let len = t_sec * sr as f64;
    let numer = if center { len } else { len - n_fft as f64 };
    let hop = (numer / (target_width - 1) as f64).floor();
    if hop < 1.0 {
        1
    } else {
        hop as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_magnifies_each_cell() {
        let m = Matrix::from_flat(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let tile = build_tile(&m);
        assert_eq!((tile.width, tile.height), (20, 20));
        assert_eq!(tile.data.len(), 400);
        assert_eq!(tile.data[0], 1.0);
        assert_eq!(tile.data[9], 1.0);
        assert_eq!(tile.data[10], 2.0);
        assert_eq!(tile.data[9 * 20 + 19], 2.0);
        assert_eq!(tile.data[10 * 20], 3.0);
        assert_eq!(tile.data[399], 4.0);
    }

    #[test]
    fn byte_image_flips_and_maps_db() {
        // top row quiet, bottom row loud
        let flat = [-80.0, -80.0, 0.0, -40.0];
        let img = flat_matrix_to_byte_image(&flat, 2, 2, true);
        assert_eq!(img.data, vec![255, 128, 0, 0]);
        let bad = flat_matrix_to_byte_image(&flat, 3, 2, true);
        assert_eq!(bad.width, 0);
    }

    #[test]
    fn slice_zero_fills_past_end() {
        let full = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let slice = extract_spectrogram_slice(&full, 3, 2, 1, 3);
        assert_eq!(slice, vec![2.0, 3.0, 0.0, 5.0, 6.0, 0.0]);
        let past = extract_spectrogram_slice(&full, 3, 2, 5, 2);
        assert_eq!(past, vec![0.0; 4]);
    }

    #[test]
    fn hop_for_width() {
        assert_eq!(choose_hop_for_width(1000, 1.0, 100, 11, true), 100);
        assert_eq!(choose_hop_for_width(1000, 1.0, 100, 11, false), 90);
        assert_eq!(choose_hop_for_width(1000, 1.0, 100, 1, true), 100);
        assert_eq!(choose_hop_for_width(10, 0.1, 100, 50, false), 1);
    }

    #[test]
    fn single_pass_spectrograms_are_unit_range() {
        let x: Vec<f32> = (0..8000).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let stft_tile = load_stft(&x, 8000, 512, 128);
        assert_eq!(stft_tile.spec.height, 257);
        assert!(stft_tile.spec.data.iter().all(|v| (0.0..=1.0).contains(v)));

        let mel_tile = load_mel_spec(&x, 8000, 512, 128, 32, 0.0, -1.0);
        assert_eq!(mel_tile.spec.height, 32);
        assert_eq!(mel_tile.tile.width, mel_tile.spec.width * TILE_MAGNIFY);
        assert!(mel_tile.spec.data.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
