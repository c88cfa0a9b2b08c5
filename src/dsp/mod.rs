//! Windowed spectral analysis: STFT, mel projection, dB scaling and
//! overlap-stitched spectrograms for long signals.

pub mod db;
pub mod matrix;
pub mod mel;
pub mod overlap;
pub mod stft;
pub mod tile;

pub use db::{amplitude_to_db, db_to_unit, power_to_db, DbScale, DB_FLOOR};
pub use matrix::Matrix;
pub use mel::mel_filterbank;
pub use overlap::{analysis_spans, combine_chunks, load_mel_overlap, load_stft_overlap, OverlapParams};
pub use stft::{stft, PadMode, StftParams, WindowKind};
pub use tile::{
    build_tile, choose_hop_for_width, extract_spectrogram_slice, flat_matrix_to_byte_image,
    load_mel_spec, load_stft, ByteImage, Spectrogram, SpectrogramTile,
};
