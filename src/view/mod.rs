//! Viewport controller and its background workers.

pub mod job;
pub mod labels;
pub mod pipeline;
pub mod remote;
pub mod track;
pub mod visual;

pub use job::{LatestJob, Worker};
pub use labels::{visible_labels, AudioLabel, VisibleLabels};
pub use pipeline::{ViewCore, ViewPipeline, ViewUpdate};
pub use remote::{announce_window, remote_params, upload_window, RemoteLink};
pub use track::{TrackSnapshot, TrackSource, WindowReader};
pub use visual::{render_window, VisualFrame, VisualOutput};
