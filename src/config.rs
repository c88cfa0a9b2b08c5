use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::dsp::OverlapParams;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spectral: SpectralConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SpectralConfig {
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_n_hop")]
    pub n_hop: usize,
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,
    #[serde(default)]
    pub fmin: f32,
    #[serde(default = "default_fmax")]
    pub fmax: f32,
    #[serde(default = "default_segment_sec")]
    pub segment_sec: f64,
    #[serde(default = "default_overlap")]
    pub overlap: f64,
}

/// What the visual worker renders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Waveform,
    #[serde(alias = "melspectrogram")]
    Mel,
    Stft,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_viewport_sec")]
    pub viewport_sec: f64,
    #[serde(default = "default_target_sr")]
    pub target_sr: u32,
    #[serde(default = "default_pixel_width")]
    pub pixel_width: usize,
    #[serde(default)]
    pub mode: ViewMode,
    #[serde(default = "default_global_peak")]
    pub global_peak: f32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_chunk_sec")]
    pub chunk_sec: f64,
    #[serde(default = "default_lead_sec")]
    pub lead_sec: f64,
    #[serde(default = "default_watchdog_ms")]
    pub watchdog_ms: u64,
    #[serde(default = "default_write_slice_ms")]
    pub write_slice_ms: u64,
    #[serde(default = "default_backlog_sec")]
    pub backlog_sec: f64,
    #[serde(default = "default_min_backlog")]
    pub min_backlog: usize,
    #[serde(default = "default_preload_chunks")]
    pub preload_chunks: usize,
    #[serde(default = "default_preload_window_chunks")]
    pub preload_window_chunks: usize,
    #[serde(default = "default_chunk_wait_ms")]
    pub chunk_wait_ms: u64,
    #[serde(default = "default_device_buffer_ms")]
    pub device_buffer_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub upload_url: Option<String>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_window_sec")]
    pub window_sec: f64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            n_fft: default_n_fft(),
            n_hop: default_n_hop(),
            n_mels: default_n_mels(),
            fmin: 0.0,
            fmax: default_fmax(),
            segment_sec: default_segment_sec(),
            overlap: default_overlap(),
        }
    }
}

impl SpectralConfig {
    pub fn overlap_params(&self) -> OverlapParams {
        OverlapParams {
            n_fft: self.n_fft,
            n_hop: self.n_hop,
            n_mels: self.n_mels,
            fmin: self.fmin,
            fmax: self.fmax,
            segment_sec: self.segment_sec as f32,
            overlap: self.overlap as f32,
            to_unit: true,
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            viewport_sec: default_viewport_sec(),
            target_sr: default_target_sr(),
            pixel_width: default_pixel_width(),
            mode: ViewMode::default(),
            global_peak: default_global_peak(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_sec: default_chunk_sec(),
            lead_sec: default_lead_sec(),
            watchdog_ms: default_watchdog_ms(),
            write_slice_ms: default_write_slice_ms(),
            backlog_sec: default_backlog_sec(),
            min_backlog: default_min_backlog(),
            preload_chunks: default_preload_chunks(),
            preload_window_chunks: default_preload_window_chunks(),
            chunk_wait_ms: default_chunk_wait_ms(),
            device_buffer_ms: default_device_buffer_ms(),
        }
    }
}

impl PlaybackConfig {
    /// Chunks that should be queued or in flight while playing.
    pub fn backlog_target(&self) -> usize {
        if self.chunk_sec <= 0.0 {
            return self.min_backlog;
        }
        self.min_backlog.max((self.backlog_sec / self.chunk_sec).ceil() as usize)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            upload_url: None,
            user: default_user(),
            window_sec: default_window_sec(),
            connect_timeout_ms: default_connect_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
        }
    }
}

fn default_n_fft() -> usize { 1024 }
fn default_n_hop() -> usize { 256 }
fn default_n_mels() -> usize { 128 }
fn default_fmax() -> f32 { -1.0 }
fn default_segment_sec() -> f64 { 0.5 }
fn default_overlap() -> f64 { 0.5 }
fn default_viewport_sec() -> f64 { 5.0 }
fn default_target_sr() -> u32 { 22050 }
fn default_pixel_width() -> usize { 1000 }
fn default_global_peak() -> f32 { 1.0 }
fn default_chunk_sec() -> f64 { 0.5 }
fn default_lead_sec() -> f64 { 0.006 }
fn default_watchdog_ms() -> u64 { 250 }
fn default_write_slice_ms() -> u64 { 10 }
fn default_backlog_sec() -> f64 { 2.0 }
fn default_min_backlog() -> usize { 6 }
fn default_preload_chunks() -> usize { 4 }
fn default_preload_window_chunks() -> usize { 5 }
fn default_chunk_wait_ms() -> u64 { 2000 }
fn default_device_buffer_ms() -> u64 { 200 }
fn default_user() -> String { "sonolabel".into() }
fn default_window_sec() -> f64 { 5.0 }
fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_total_timeout_ms() -> u64 { 120_000 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// `./sonolabel.toml`, then `~/.config/sonolabel/config.toml`, then the
/// platform config directory.
pub fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("sonolabel.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("sonolabel").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("sonolabel").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [view]
            mode = "mel"
            viewport_sec = 8.0

            [playback]
            chunk_sec = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(cfg.view.mode, ViewMode::Mel);
        assert_eq!(cfg.view.viewport_sec, 8.0);
        assert_eq!(cfg.view.target_sr, 22050);
        assert_eq!(cfg.spectral.n_mels, 128);
        assert_eq!(cfg.playback.lead_sec, 0.006);
        assert_eq!(cfg.playback.backlog_target(), 8);
        assert_eq!(cfg.remote.connect_timeout_ms, 5000);
    }

    #[test]
    fn backlog_target_has_floor() {
        let cfg = PlaybackConfig::default();
        assert_eq!(cfg.backlog_target(), 6);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sonolabel.toml");
        std::fs::write(&path, "[spectral]\nn_fft = 2048\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.spectral.n_fft, 2048);
        assert_eq!(cfg.spectral.overlap_params().n_fft, 2048);
        assert!(load_config(&dir.path().join("missing.toml")).is_none());
    }
}
