//! Audio-clocked playback of decoded chunks with video presentation.

pub mod clock;
pub mod player;
pub mod sink;

pub use clock::{played_from_delay, AudioClock};
pub use player::Player;
pub use sink::{AudioSink, SinkState, VirtualSink};
