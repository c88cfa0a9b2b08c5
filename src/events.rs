//! Publish/subscribe fan-out of decoder, player and remote events.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};

use crate::media::VideoFrame;

/// One presentation callback. `done` frames carry no pixels and are sent
/// once at the end of every play session.
#[derive(Clone, Debug)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Option<Arc<[u8]>>,
    pub channels: u8,
    pub played_sec: f64,
    pub done: bool,
}

impl PresentedFrame {
    pub fn from_video(frame: &VideoFrame, played_sec: f64) -> Self {
        Self {
            width: frame.width,
            height: frame.height,
            pixels: Some(Arc::clone(&frame.pixels)),
            channels: 4,
            played_sec,
            done: false,
        }
    }

    pub fn done(played_sec: f64) -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: None,
            channels: 4,
            played_sec,
            done: true,
        }
    }
}

/// Receiver of decode and playback events. Every method defaults to a no-op.
pub trait MediaSink: Send + Sync {
    fn on_video_frame(&self, _frame: &PresentedFrame) {}

    /// Diagnostic event; `value` is a time or a count depending on `msg`.
    fn on_decoded_event(&self, _value: f64, _msg: &str) {}

    fn on_played_sec(&self, _sec: f64) {}

    fn on_thumbnail(&self, _frame: &VideoFrame) {}
}

/// Receiver of text messages arriving on the label connection.
pub trait WsSink: Send + Sync {
    fn on_ws_message(&self, text: &str);
}

/// Registry of sinks. Publishing snapshots the list so sinks may register or
/// unregister from inside a callback.
#[derive(Default)]
pub struct EventHub {
    media: RwLock<Vec<Arc<dyn MediaSink>>>,
    ws: RwLock<Vec<Arc<dyn WsSink>>>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_media(&self, sink: Arc<dyn MediaSink>) {
        self.media.write().expect("media sinks poisoned").push(sink);
    }

    pub fn unregister_media(&self, sink: &Arc<dyn MediaSink>) {
        self.media
            .write()
            .expect("media sinks poisoned")
            .retain(|s| !Arc::ptr_eq(s, sink));
    }

    pub fn register_ws(&self, sink: Arc<dyn WsSink>) {
        self.ws.write().expect("ws sinks poisoned").push(sink);
    }

    pub fn unregister_ws(&self, sink: &Arc<dyn WsSink>) {
        self.ws
            .write()
            .expect("ws sinks poisoned")
            .retain(|s| !Arc::ptr_eq(s, sink));
    }

    fn media_sinks(&self) -> Vec<Arc<dyn MediaSink>> {
        self.media.read().expect("media sinks poisoned").clone()
    }

    pub fn video_frame(&self, frame: &PresentedFrame) {
        for sink in self.media_sinks() {
            sink.on_video_frame(frame);
        }
    }

    pub fn decoded_event(&self, value: f64, msg: &str) {
        log::debug!("{}: {}", msg, value);
        for sink in self.media_sinks() {
            sink.on_decoded_event(value, msg);
        }
    }

    pub fn played_sec(&self, sec: f64) {
        for sink in self.media_sinks() {
            sink.on_played_sec(sec);
        }
    }

    pub fn thumbnail(&self, frame: &VideoFrame) {
        for sink in self.media_sinks() {
            sink.on_thumbnail(frame);
        }
    }

    pub fn ws_message(&self, text: &str) {
        let sinks = self.ws.read().expect("ws sinks poisoned").clone();
        for sink in sinks {
            sink.on_ws_message(text);
        }
    }
}

/// Owned copy of a media event for channel delivery.
#[derive(Clone, Debug)]
pub enum MediaEvent {
    Frame(PresentedFrame),
    Decoded { value: f64, msg: String },
    Played(f64),
    Thumbnail(VideoFrame),
}

/// Forwards every media event into an mpsc channel so a consumer thread
/// can poll or block instead of running inside the producer's callback.
pub struct ChannelSink {
    tx: Sender<MediaEvent>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, Receiver<MediaEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl MediaSink for ChannelSink {
    fn on_video_frame(&self, frame: &PresentedFrame) {
        let _ = self.tx.send(MediaEvent::Frame(frame.clone()));
    }

    fn on_decoded_event(&self, value: f64, msg: &str) {
        let _ = self.tx.send(MediaEvent::Decoded {
            value,
            msg: msg.to_string(),
        });
    }

    fn on_played_sec(&self, sec: f64) {
        let _ = self.tx.send(MediaEvent::Played(sec));
    }

    fn on_thumbnail(&self, frame: &VideoFrame) {
        let _ = self.tx.send(MediaEvent::Thumbnail(frame.clone()));
    }
}
