use anyhow::{Context, Result};
use std::path::Path;

use crate::media::source::{DecodedFrame, MediaSource};
use crate::media::file::SymphoniaSource;

use super::{resample, Signal};

/// Decode the whole first audio track of `path` to mono at its native rate.
pub fn decode_file(path: &Path) -> Result<Signal> {
    load(path, None, 0.0, None)
}

/// Decode `[offset, offset + duration)` of `path` to mono, optionally
/// resampled to `target_sr`. A `None` duration reads to the end.
pub fn load(path: &Path, target_sr: Option<u32>, offset: f64, duration: Option<f64>) -> Result<Signal> {
    let mut source = SymphoniaSource::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let sample_rate = source.audio_sample_rate().context("Unknown sample rate")?;

    let offset = offset.max(0.0);
    let mut first_pts = 0.0;
    if offset > 0.0 {
        first_pts = source
            .seek(offset)
            .with_context(|| format!("Failed to seek to {:.3}s", offset))?;
        source.flush();
    }
    let end = duration.map(|d| offset + d.max(0.0));

    let mut samples: Vec<f32> = Vec::new();
    let mut started = false;
    while let Some(frame) = source.next_frame().context("Failed to decode audio")? {
        let DecodedFrame::Audio(frame) = frame else {
            continue;
        };
        if !started {
            first_pts = frame.pts;
            started = true;
        }
        if end.is_some_and(|e| frame.pts >= e) {
            break;
        }
        samples.extend_from_slice(&frame.samples);
    }

    // seeks may land early
    let skip = (((offset - first_pts).max(0.0)) * sample_rate as f64).round() as usize;
    samples.drain(..skip.min(samples.len()));
    if let Some(d) = duration {
        samples.truncate((d.max(0.0) * sample_rate as f64).round() as usize);
    }

    let (samples, sample_rate) = match target_sr {
        Some(sr) if sr != sample_rate => (resample(&samples, sample_rate, sr)?, sr),
        _ => (samples, sample_rate),
    };

    log::info!(
        "Decoded audio: {} samples, {}Hz, {:.1}s",
        samples.len(),
        sample_rate,
        samples.len() as f32 / sample_rate as f32
    );

    Ok(Signal::new(samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::file::fixtures::write_tone_wav;

    #[test]
    fn decodes_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_tone_wav(&path, 8000, 2.0);
        let signal = decode_file(&path).unwrap();
        assert_eq!(signal.sample_rate, 8000);
        assert_eq!(signal.samples.len(), 16_000);
        assert!(signal.peak() > 0.4 && signal.peak() <= 0.5);
    }

    #[test]
    fn window_with_resample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.wav");
        write_tone_wav(&path, 16_000, 3.0);
        let signal = load(&path, Some(8000), 1.0, Some(1.0)).unwrap();
        assert_eq!(signal.sample_rate, 8000);
        assert_eq!(signal.samples.len(), 8000);
    }

    #[test]
    fn window_past_end_is_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wav");
        write_tone_wav(&path, 8000, 1.0);
        let signal = load(&path, None, 0.5, Some(2.0)).unwrap();
        assert_eq!(signal.samples.len(), 4000);
    }

    #[test]
    fn missing_file_has_context() {
        let err = decode_file(Path::new("/nope/missing.wav")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open audio file"));
    }
}
