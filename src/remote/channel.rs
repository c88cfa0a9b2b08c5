use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use super::protocol::MAX_MESSAGE_BYTES;

/// Outgoing half of the persistent connection to the labeling service.
pub trait LabelChannel: Send + Sync {
    /// Queue a text frame. Returns false when the connection is gone.
    fn send_text(&self, text: &str) -> bool;
}

/// Send `text` unless it exceeds [`MAX_MESSAGE_BYTES`].
pub fn send_message(channel: &dyn LabelChannel, text: &str) -> bool {
    if text.len() > MAX_MESSAGE_BYTES {
        log::warn!("Dropping {} byte message, over the {} byte limit", text.len(), MAX_MESSAGE_BYTES);
        return false;
    }
    channel.send_text(text)
}

/// Bridges outgoing messages to whatever transport drains the receiver.
pub struct MpscChannel {
    tx: Mutex<Sender<String>>,
}

impl MpscChannel {
    pub fn new() -> (Self, Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl LabelChannel for MpscChannel {
    fn send_text(&self, text: &str) -> bool {
        self.tx
            .lock()
            .expect("label channel poisoned")
            .send(text.to_string())
            .is_ok()
    }
}
