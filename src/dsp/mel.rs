use super::matrix::Matrix;

pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank, `n_mels x (n_fft/2 + 1)`.
///
/// Break points are evenly spaced on the HTK mel scale between `fmin` and
/// `fmax` and mapped to FFT bins by flooring. `fmax <= 0` means Nyquist.
/// With `slaney` each filter is scaled by `2 / bandwidth_hz` so filters have
/// roughly equal area.
pub fn mel_filterbank(
    sr: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
    slaney: bool,
) -> Matrix {
    if sr == 0 || n_fft == 0 || n_mels == 0 {
        return Matrix::default();
    }
    let n_bins = n_fft / 2 + 1;
    let nyquist = sr as f32 / 2.0;
    let fmax = if fmax <= 0.0 { nyquist } else { fmax };

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_points: Vec<isize> = hz_points
        .iter()
        .map(|&hz| (n_bins as f32 * hz / nyquist).floor() as isize)
        .collect();

    let mut fb = Matrix::zeros(n_mels, n_bins);
    for m in 0..n_mels {
        let (left, center, right) = (bin_points[m], bin_points[m + 1], bin_points[m + 2]);
        let row = fb.row_mut(m);
        for j in left..center {
            if j >= 0 && (j as usize) < n_bins {
                row[j as usize] = (j - left) as f32 / (center - left) as f32;
            }
        }
        for j in center..right {
            if j >= 0 && (j as usize) < n_bins {
                row[j as usize] = (right - j) as f32 / (right - center) as f32;
            }
        }
        if slaney {
            let bandwidth = hz_points[m + 2] - hz_points[m];
            if bandwidth > 0.0 {
                let scale = 2.0 / bandwidth;
                for v in row.iter_mut() {
                    *v *= scale;
                }
            }
        }
    }
    fb
}
