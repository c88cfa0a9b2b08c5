mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::BufRead;
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cli::Cli;
use sonolabel::config::{self, Config};
use sonolabel::dsp::flat_matrix_to_byte_image;
use sonolabel::events::{ChannelSink, EventHub, MediaEvent, MediaSink, WsSink};
use sonolabel::media::{MediaSource, SymphoniaSource};
use sonolabel::playback::{Player, VirtualSink};
use sonolabel::remote::{encode_png_gray, parse_job_done, MpscChannel, Uploader};
use sonolabel::segment::build_global_segments;
use sonolabel::view::{AudioLabel, RemoteLink, ViewPipeline, ViewUpdate, VisualFrame, VisualOutput};

const RESULT_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    let mut cfg = Config::default();
    if let Some(path) = cli.config.clone().or_else(config::find_config) {
        match config::load_config(&path) {
            Some(loaded) => {
                log::info!("Loaded config from {}", path.display());
                cfg = loaded;
            }
            None => log::warn!("Failed to load config from {}", path.display()),
        }
    }
    apply_cli(&mut cli, &mut cfg);

    let input = cli.input.clone().context("Input audio file is required")?;
    if !input.exists() {
        bail!("Input file not found: {}", input.display());
    }

    if cli.list_segments {
        return list_segments(&input, &cfg);
    }

    log::info!("sonolabel - windowed spectrogram viewer");
    log::info!("Input: {}", input.display());
    log::info!("Mode: {:?}, viewport {:.2}s at {:.2}s", cfg.view.mode, cfg.view.viewport_sec, cli.start);

    let hub = EventHub::new();
    let (remote, outgoing) = match &cli.upload_url {
        Some(url) => {
            let uploader = Uploader::from_config(&cfg.remote, url)?;
            let (channel, outgoing) = MpscChannel::new();
            log::info!("Remote labeling via {}", uploader.url());
            let link = RemoteLink {
                uploader: Arc::new(uploader),
                channel: Arc::new(channel),
                user: cli.user.clone().unwrap_or_default(),
                window_sec: cfg.remote.window_sec,
            };
            (Some(link), Some(outgoing))
        }
        None => (None, None),
    };

    let pipeline = ViewPipeline::new(cfg.view.clone(), cfg.spectral.clone(), remote);
    hub.register_media(Arc::clone(pipeline.core()) as Arc<dyn MediaSink>);
    hub.register_ws(Arc::clone(pipeline.core()) as Arc<dyn WsSink>);
    let updates = pipeline.subscribe();

    pipeline.load_track(&input)?;
    pipeline.set_viewport_window(cli.start);
    let frame = wait_for_visual(&pipeline, &updates)?;
    print_visual(&frame);

    if let Some(png) = &cli.png {
        write_png(&frame, png)?;
    }

    if let Some(path) = &cli.labels {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read labels: {}", path.display()))?;
        let spans = parse_job_done(&text).with_context(|| format!("Not a job_done message: {}", path.display()))?;
        log::info!("Imported {} labels", spans.len());
        pipeline.add_labels(spans.into_iter().map(AudioLabel::from).collect());
        wait_for_labels(&pipeline, &updates);
        print_labels(&pipeline.visible_labels().labels);
    }

    if let Some(outgoing) = outgoing {
        remote_sweep(&pipeline, &hub, &outgoing, &cfg)?;
    }

    if cli.play {
        play(&input, &cfg, &hub, cli.start, cli.play_duration)?;
    }

    log::info!("Done");
    Ok(())
}

/// Flags given on the command line win over the config file.
fn apply_cli(cli: &mut Cli, cfg: &mut Config) {
    if let Some(viewport) = cli.viewport {
        cfg.view.viewport_sec = viewport;
    }
    if let Some(width) = cli.width {
        cfg.view.pixel_width = width;
    }
    if let Some(mode) = cli.mode {
        cfg.view.mode = mode;
    }
    if cli.user.is_none() {
        cli.user = Some(cfg.remote.user.clone());
    }
    if cli.upload_url.is_none() && cfg.remote.enabled {
        cli.upload_url = cfg.remote.upload_url.clone();
    }
}

fn list_segments(input: &Path, cfg: &Config) -> Result<()> {
    let source = SymphoniaSource::open(input)
        .with_context(|| format!("Failed to open audio file: {}", input.display()))?;
    let duration = source.duration().context("Track length unknown")?;
    let sr = cfg.view.target_sr;
    let total = (duration * sr as f64).round() as usize;
    let spectral = &cfg.spectral;
    let segments = build_global_segments(
        total,
        sr,
        spectral.segment_sec,
        spectral.overlap,
        spectral.n_fft,
        spectral.n_hop,
        true,
    );
    println!("{} segments over {:.3}s at {}Hz:", segments.len(), duration, sr);
    for (i, s) in segments.iter().enumerate() {
        println!(
            "  [{:4}] {:9.3}s - {:9.3}s  samples {}..{}  frames {}+{}",
            i, s.start_sec, s.end_sec, s.start_sample, s.end_sample, s.frame_start, s.frame_size
        );
    }
    Ok(())
}

fn wait_for_visual(pipeline: &ViewPipeline, updates: &Receiver<ViewUpdate>) -> Result<Arc<VisualFrame>> {
    let deadline = Instant::now() + RESULT_TIMEOUT;
    loop {
        let current = pipeline.latest_visual().filter(|f| {
            f.generation == pipeline.generation() && (f.start_sec - pipeline.window_start()).abs() < 1e-9
        });
        if let Some(frame) = current {
            return Ok(frame);
        }
        if Instant::now() > deadline {
            bail!("Timed out waiting for the view to render");
        }
        let _ = updates.recv_timeout(Duration::from_millis(100));
    }
}

fn wait_for_labels(pipeline: &ViewPipeline, updates: &Receiver<ViewUpdate>) {
    let deadline = Instant::now() + RESULT_TIMEOUT;
    while Instant::now() < deadline {
        if let Ok(ViewUpdate::Labels(generation)) = updates.recv_timeout(Duration::from_millis(100)) {
            if generation == pipeline.generation() {
                return;
            }
        }
    }
    log::warn!("Timed out waiting for labels");
}

fn print_visual(frame: &VisualFrame) {
    println!(
        "Window {:.3}s - {:.3}s ({:?}), {} visible segments",
        frame.start_sec,
        frame.start_sec + frame.span_sec,
        frame.mode,
        frame.segments.len()
    );
    match &frame.output {
        VisualOutput::Waveform(w) => println!("  waveform: {} vertices ({:?})", w.draw_count, w.primitive),
        VisualOutput::Spectrogram(tile) => println!(
            "  spectrogram: {}x{} (tile {}x{}, {} frames/chunk, hop {})",
            tile.spec.width, tile.spec.height, tile.tile.width, tile.tile.height, tile.frames_per_chunk, tile.hop_frames
        ),
    }
}

fn print_labels(labels: &[AudioLabel]) {
    println!("{} labels in view:", labels.len());
    for l in labels {
        println!("  {:9.3}s - {:9.3}s  {}", l.start_sec, l.end_sec, l.text);
    }
}

fn write_png(frame: &VisualFrame, path: &Path) -> Result<()> {
    let VisualOutput::Spectrogram(tile) = &frame.output else {
        bail!("PNG output needs a spectrogram mode (--mode mel or --mode stft)");
    };
    let image = flat_matrix_to_byte_image(&tile.spec.data, tile.spec.height, tile.spec.width, false);
    let png = encode_png_gray(image.width as u32, image.height as u32, &image.data)?;
    std::fs::write(path, png).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Wrote {}x{} spectrogram to {}", image.width, image.height, path.display());
    Ok(())
}

/// Upload window after window. Outgoing messages go to stdout, replies are
/// read line by line from stdin and routed like channel messages.
fn remote_sweep(pipeline: &ViewPipeline, hub: &EventHub, outgoing: &Receiver<String>, cfg: &Config) -> Result<()> {
    let duration = pipeline.snapshot().map_or(0.0, |s| s.duration);
    let pb = ProgressBar::new((duration * 1000.0) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {msg}")?
            .progress_chars("=>-"),
    );
    let wait = Duration::from_millis(cfg.remote.total_timeout_ms);
    let mut replies = std::io::stdin().lock().lines();
    let mut last_activity = Instant::now();

    loop {
        let message = match outgoing.recv_timeout(Duration::from_millis(100)) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => {
                if pipeline.remote_position() >= duration {
                    break;
                }
                if last_activity.elapsed() > wait {
                    pb.abandon_with_message("no request sent, sweep stopped");
                    return Ok(());
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                pb.abandon_with_message("label channel closed");
                return Ok(());
            }
        };
        pb.suspend(|| println!("{}", message));
        let Some(reply) = replies.next() else {
            pb.abandon_with_message("reply stream closed");
            return Ok(());
        };
        hub.ws_message(&reply.context("Failed to read reply")?);
        last_activity = Instant::now();
        let position = pipeline.remote_position().min(duration);
        pb.set_position((position * 1000.0) as u64);
        pb.set_message(format!("{:.1}s / {:.1}s, {} labels", position, duration, pipeline.labels().len()));
    }
    pb.finish_with_message(format!("{} labels", pipeline.labels().len()));
    Ok(())
}

fn play(input: &Path, cfg: &Config, hub: &Arc<EventHub>, start: f64, play_duration: Option<f64>) -> Result<()> {
    let source = SymphoniaSource::open(input)
        .with_context(|| format!("Failed to open audio file: {}", input.display()))?;
    let sink = VirtualSink::new(cfg.view.target_sr, cfg.playback.device_buffer_ms);
    let mut player = Player::new(Box::new(source), Box::new(sink), Arc::clone(hub), cfg.playback.clone());

    let total = player.duration().unwrap_or(0.0);
    let duration = play_duration.unwrap_or(total - start);
    if duration <= 0.0 {
        bail!("Nothing to play from {:.3}s", start);
    }

    let (progress, events) = ChannelSink::new();
    let progress: Arc<dyn MediaSink> = progress;
    hub.register_media(Arc::clone(&progress));

    let pb = ProgressBar::new((duration * 1000.0) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {msg}")?
            .progress_chars("=>-"),
    );
    log::info!("Playing {:.3}s from {:.3}s", duration, start);
    player.play(start, duration)?;

    let mut frames = 0usize;
    loop {
        match events.recv_timeout(RESULT_TIMEOUT) {
            Ok(MediaEvent::Played(sec)) => {
                pb.set_position(((sec - start).max(0.0) * 1000.0) as u64);
                pb.set_message(format!("{:.2}s", sec));
            }
            Ok(MediaEvent::Frame(frame)) if frame.done => break,
            Ok(MediaEvent::Frame(_)) => frames += 1,
            Ok(_) => {}
            Err(_) => {
                log::warn!("Playback stalled");
                break;
            }
        }
    }
    player.wait();
    hub.unregister_media(&progress);
    pb.finish_with_message(format!("played, {} video frames", frames));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flags_override_config() {
        let mut cfg = Config::default();
        cfg.view.viewport_sec = 8.0;
        cfg.view.pixel_width = 640;
        let mut cli = Cli::parse_from(["sonolabel", "in.wav", "--viewport", "5", "--width", "1000"]);
        apply_cli(&mut cli, &mut cfg);
        assert_eq!(cfg.view.viewport_sec, 5.0);
        assert_eq!(cfg.view.pixel_width, 1000);
    }

    #[test]
    fn absent_flags_keep_config() {
        let mut cfg = Config::default();
        cfg.view.viewport_sec = 8.0;
        cfg.remote.enabled = true;
        cfg.remote.upload_url = Some("http://labels.local/upload".into());
        let mut cli = Cli::parse_from(["sonolabel", "in.wav"]);
        apply_cli(&mut cli, &mut cfg);
        assert_eq!(cfg.view.viewport_sec, 8.0);
        assert_eq!(cli.upload_url.as_deref(), Some("http://labels.local/upload"));
        assert_eq!(cli.user.as_deref(), Some("sonolabel"));
    }
}
