//! Conversions between float samples and little-endian signed 16-bit PCM.

const SCALE: f32 = 32768.0;

pub fn f32_to_i16(v: f32) -> i16 {
    (v * SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn encode_s16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&f32_to_i16(s).to_le_bytes());
    }
    out
}

pub fn decode_s16le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// S16LE mono bytes back to floats in [-1, 1). A trailing odd byte is ignored.
pub fn s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / SCALE)
        .collect()
}
