//! One round of the remote labeling sweep.

use std::sync::Arc;

use crate::config::SpectralConfig;
use crate::dsp::{flat_matrix_to_byte_image, load_mel_overlap, OverlapParams};
use crate::remote::{reader_time, send_message, LabelChannel, SpectrogramUploader};

use super::track::{TrackSnapshot, WindowReader};

/// Connection to the labeling service.
#[derive(Clone)]
pub struct RemoteLink {
    pub uploader: Arc<dyn SpectrogramUploader>,
    pub channel: Arc<dyn LabelChannel>,
    pub user: String,
    pub window_sec: f64,
}

/// Non-overlapped dB mel analysis sent to the service.
pub fn remote_params(spectral: &SpectralConfig) -> OverlapParams {
    OverlapParams {
        overlap: 0.0,
        to_unit: false,
        ..spectral.overlap_params()
    }
}

/// Upload the mel spectrogram of the window at `start`. Returns the seconds
/// covered, or `None` when the round has to be skipped.
pub fn upload_window(
    link: &RemoteLink,
    reader: &mut WindowReader,
    snap: &TrackSnapshot,
    start: f64,
    params: &OverlapParams,
) -> Option<f64> {
    let window = link.window_sec.min(snap.duration - start);
    if window <= 0.0 {
        return None;
    }
    let signal = match reader.read(snap, start, window) {
        Ok(signal) => signal,
        Err(e) => {
            log::warn!("Remote window at {:.3}s: {:#}", start, e);
            return None;
        }
    };
    let tile = load_mel_overlap(&signal.samples, signal.sample_rate, params);
    if tile.is_empty() {
        log::warn!("Remote window at {:.3}s produced no spectrogram", start);
        return None;
    }
    let image = flat_matrix_to_byte_image(&tile.spec.data, tile.spec.height, tile.spec.width, true);

    let response = link.uploader.upload_spectrogram_png(&image, &link.user, "spec.png");
    if !response.success() {
        log::warn!(
            "Spectrogram upload failed: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
        return None;
    }
    Some(window)
}

/// Ask the service to label the uploaded window.
pub fn announce_window(link: &RemoteLink, start: f64, window: f64) -> bool {
    let message = match reader_time(start, window) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Failed to encode reader_time: {}", e);
            return false;
        }
    };
    if !send_message(link.channel.as_ref(), &message) {
        log::warn!("Label channel closed");
        return false;
    }
    log::debug!("Requested labels for {:.3}s - {:.3}s", start, start + window);
    true
}
