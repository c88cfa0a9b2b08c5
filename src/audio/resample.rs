use anyhow::{bail, Context, Result};
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

const BLOCK: usize = 1024;

/// Resample mono audio from `from_rate` to `to_rate` with a windowed-sinc
/// resampler. The output is aligned with the input (filter delay removed) and
/// holds `round(len * to / from)` samples.
///
/// Every call builds a fresh resampler, so no state leaks between calls.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        bail!("Invalid sample rate conversion {} -> {}", from_rate, to_rate);
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, BLOCK, 1)
        .context("Failed to create resampler")?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + BLOCK);

    let mut pos = 0;
    while pos < samples.len() {
        let need = resampler.input_frames_next();
        let end = (pos + need).min(samples.len());
        let input: [&[f32]; 1] = [&samples[pos..end]];
        let block = if end - pos == need {
            resampler.process(&input[..], None)
        } else {
            resampler.process_partial(Some(&input[..]), None)
        }
        .context("Resampling failed")?;
        out.extend_from_slice(&block[0]);
        pos = end;
    }

    // Push the filter tail out.
    while out.len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .context("Resampling failed")?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    out.drain(..delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_follows_ratio() {
        let x: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.01).sin()).collect();
        let y = resample(&x, 44100, 22050).unwrap();
        assert_eq!(y.len(), 22050);
        let z = resample(&x[..1000], 48000, 16000).unwrap();
        assert_eq!(z.len(), 333);
    }

    #[test]
    fn preserves_low_frequency_tone() {
        let from = 16000;
        let to = 8000;
        let x: Vec<f32> = (0..16000)
            .map(|i| (2.0 * std::f32::consts::PI * 200.0 * i as f32 / from as f32).sin())
            .collect();
        let y = resample(&x, from, to).unwrap();
        let mid = &y[2000..6000];
        let rms = (mid.iter().map(|v| v * v).sum::<f32>() / mid.len() as f32).sqrt();
        assert!((rms - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05, "rms {}", rms);
    }

    #[test]
    fn identity_and_invalid() {
        assert_eq!(resample(&[0.1, 0.2], 8000, 8000).unwrap(), vec![0.1, 0.2]);
        assert!(resample(&[0.1], 0, 8000).is_err());
    }
}
