use clap::Parser;
use std::path::PathBuf;

use sonolabel::config::ViewMode;

#[derive(Parser, Debug)]
#[command(name = "sonolabel", about = "Windowed spectrogram viewer, player and remote labeler")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG, AAC)
    pub input: Option<PathBuf>,

    /// Config file (defaults to sonolabel.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// What to render for the visible window
    #[arg(short, long, value_enum)]
    pub mode: Option<ViewMode>,

    /// Start of the visible window in seconds
    #[arg(long, default_value_t = 0.0)]
    pub start: f64,

    /// Visible window length in seconds [default: 5]
    #[arg(long)]
    pub viewport: Option<f64>,

    /// Pixel width used for the waveform envelope [default: 1000]
    #[arg(long)]
    pub width: Option<usize>,

    /// Write the computed spectrogram as a grayscale PNG
    #[arg(long)]
    pub png: Option<PathBuf>,

    /// Play the track headless against a virtual audio device
    #[arg(long)]
    pub play: bool,

    /// Seconds to play (defaults to the rest of the track)
    #[arg(long)]
    pub play_duration: Option<f64>,

    /// Import labels from a saved job_done message
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Spectrogram upload endpoint; enables the remote labeling sweep
    #[arg(long)]
    pub upload_url: Option<String>,

    /// User name sent with uploads
    #[arg(long)]
    pub user: Option<String>,

    /// Print the track-wide segment index and exit
    #[arg(long)]
    pub list_segments: bool,
}
