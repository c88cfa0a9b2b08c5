//! Remote labeling: wire messages, the outgoing channel and image upload.

pub mod channel;
pub mod protocol;
pub mod upload;

pub use channel::{send_message, LabelChannel, MpscChannel};
pub use protocol::{command, parse_job_done, reader_time, LabelSpan};
pub use upload::{encode_png_gray, SpectrogramUploader, UploadResponse, Uploader};
