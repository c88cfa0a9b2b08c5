use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::error::MediaError;

use super::source::{AudioFrame, DecodedFrame, MediaSource};

/// Audio-only [`MediaSource`] over any container symphonia can probe.
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    time_base: Option<TimeBase>,
    n_frames: Option<u64>,
}

impl SymphoniaSource {
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        let file = std::fs::File::open(path).map_err(|source| MediaError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| MediaError::Probe(e.to_string()))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(MediaError::NoTrack)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.ok_or(MediaError::NoTrack)?;
        let time_base = track.codec_params.time_base;
        let n_frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| MediaError::Probe(e.to_string()))?;

        log::debug!(
            "Opened {}: track {}, {}Hz, {:?} frames",
            path.display(),
            track_id,
            sample_rate,
            n_frames
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            time_base,
            n_frames,
        })
    }

    fn ts_to_sec(&self, ts: u64) -> f64 {
        match self.time_base {
            Some(tb) => {
                let t = tb.calc_time(ts);
                t.seconds as f64 + t.frac
            }
            None => ts as f64 / self.sample_rate as f64,
        }
    }
}

impl MediaSource for SymphoniaSource {
    fn audio_sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }

    fn has_video(&self) -> bool {
        false
    }

    fn duration(&self) -> Option<f64> {
        self.n_frames.map(|n| self.ts_to_sec(n))
    }

    fn seek(&mut self, t: f64) -> Result<f64, MediaError> {
        let t = t.max(0.0);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(t.trunc() as u64, t.fract()),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| MediaError::Seek {
                time: t,
                reason: e.to_string(),
            })?;
        Ok(self.ts_to_sec(seeked.actual_ts))
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, MediaError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(MediaError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }
            let pts = self.ts_to_sec(packet.ts());

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping undecodable packet at {:.3}s: {}", pts, e);
                    continue;
                }
                Err(e) => return Err(MediaError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();
            if num_frames == 0 {
                continue;
            }

            let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            // Downmix to mono
            let channels = spec.channels.count().max(1);
            let samples = if channels == 1 {
                sample_buf.samples().to_vec()
            } else {
                sample_buf
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect()
            };

            return Ok(Some(DecodedFrame::Audio(AudioFrame {
                pts,
                sample_rate: spec.rate,
                samples,
            })));
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    /// Write a mono 16-bit WAV of `seconds` of a 440 Hz tone.
    pub fn write_tone_wav(path: &Path, sample_rate: u32, seconds: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let n = (seconds * sample_rate as f32) as usize;
        for i in 0..n {
            let t = i as f32 / sample_rate as f32;
            let v = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
}
