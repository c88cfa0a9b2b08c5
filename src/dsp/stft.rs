use rustfft::{num_complex::Complex, FftPlanner};
use serde::Deserialize;

use super::matrix::Matrix;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Hann,
    Hamming,
}

/// How the signal is extended past its ends when `center` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadMode {
    /// Mirror without repeating the edge sample: `c b | a b c | b a`.
    Reflect,
    /// Mirror including the edge sample: `b a | a b c | c b`.
    Symmetric,
    /// Repeat the edge sample.
    Edge,
}

#[derive(Clone, Copy, Debug)]
pub struct StftParams {
    pub n_fft: usize,
    pub n_hop: usize,
    pub window: WindowKind,
    pub center: bool,
    pub pad_mode: PadMode,
}

impl StftParams {
    pub fn new(n_fft: usize, n_hop: usize) -> Self {
        Self {
            n_fft,
            n_hop,
            window: WindowKind::Hann,
            center: true,
            pad_mode: PadMode::Reflect,
        }
    }

    pub fn center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }
}

/// Complex STFT result, row-major bins x frames.
#[derive(Clone, Debug, Default)]
pub struct ComplexSpectrum {
    pub bins: usize,
    pub frames: usize,
    pub data: Vec<Complex<f32>>,
}

impl ComplexSpectrum {
    pub fn is_empty(&self) -> bool {
        self.bins == 0 || self.frames == 0
    }

    /// |X|^2 per cell.
    pub fn power(&self) -> Matrix {
        Matrix {
            rows: self.bins,
            cols: self.frames,
            data: self.data.iter().map(|c| c.norm_sqr()).collect(),
        }
    }

    /// |X| per cell.
    pub fn magnitude(&self) -> Matrix {
        Matrix {
            rows: self.bins,
            cols: self.frames,
            data: self.data.iter().map(|c| c.norm()).collect(),
        }
    }
}

/// Periodic analysis window normalized to unit sum.
pub fn window(kind: WindowKind, n: usize) -> Vec<f32> {
    let mut w: Vec<f32> = (0..n)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            match kind {
                WindowKind::Hann => 0.5 * (1.0 - phase.cos()),
                WindowKind::Hamming => 0.54 - 0.46 * phase.cos(),
            }
        })
        .collect();
    let sum: f32 = w.iter().sum();
    if sum > 0.0 {
        for v in &mut w {
            *v /= sum;
        }
    }
    w
}

fn source_index(i: isize, n: usize, mode: PadMode) -> usize {
    let len = n as isize;
    match mode {
        PadMode::Edge => i.clamp(0, len - 1) as usize,
        PadMode::Reflect if n > 1 => {
            let period = 2 * (len - 1);
            let k = i.rem_euclid(period);
            (if k >= len { period - k } else { k }) as usize
        }
        PadMode::Reflect => 0,
        PadMode::Symmetric => {
            let period = 2 * len;
            let k = i.rem_euclid(period);
            (if k >= len { period - 1 - k } else { k }) as usize
        }
    }
}

/// Extend `x` by `left` and `right` samples. Pads longer than the signal keep folding.
pub fn pad(x: &[f32], left: usize, right: usize, mode: PadMode) -> Vec<f32> {
    if x.is_empty() {
        return vec![0.0; left + right];
    }
    let mut out = Vec::with_capacity(left + x.len() + right);
    out.extend((0..left).map(|p| x[source_index(p as isize - left as isize, x.len(), mode)]));
    out.extend_from_slice(x);
    out.extend((0..right).map(|j| x[source_index((x.len() + j) as isize, x.len(), mode)]));
    out
}

/// Short-time Fourier transform. Returns an empty spectrum on invalid parameters
/// or when the (padded) signal is shorter than one frame.
pub fn stft(signal: &[f32], params: &StftParams) -> ComplexSpectrum {
    let n_fft = params.n_fft;
    if n_fft == 0 || params.n_hop == 0 {
        return ComplexSpectrum::default();
    }
    let pad_len = if params.center { n_fft / 2 } else { 0 };
    let padded = if pad_len > 0 {
        pad(signal, pad_len, pad_len, params.pad_mode)
    } else {
        signal.to_vec()
    };
    if padded.len() < n_fft {
        return ComplexSpectrum::default();
    }

    let frames = (padded.len() - n_fft) / params.n_hop + 1;
    let bins = params.bins();
    let win = window(params.window, n_fft);

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut data = vec![Complex::new(0.0, 0.0); bins * frames];
    let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
    for f in 0..frames {
        let start = f * params.n_hop;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(padded[start + i] * win[i], 0.0);
        }
        fft.process(&mut buffer);
        for (b, value) in buffer[..bins].iter().enumerate() {
            data[b * frames + f] = *value;
        }
    }

    ComplexSpectrum { bins, frames, data }
}

/// Power spectrogram (|X|^2), bins x frames.
pub fn stft_power(signal: &[f32], params: &StftParams) -> Matrix {
    stft(signal, params).power()
}
