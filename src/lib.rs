pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod events;
pub mod media;
pub mod playback;
pub mod remote;
pub mod segment;
pub mod view;
