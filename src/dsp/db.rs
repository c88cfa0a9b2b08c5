use super::matrix::Matrix;

/// Floor applied to spectrogram chunks before they are stitched.
pub const DB_FLOOR: f32 = -80.0;

/// Reference and range settings for the dB conversions.
#[derive(Clone, Copy, Debug)]
pub struct DbScale {
    /// Use the matrix maximum as 0 dB instead of `ref_value`.
    pub ref_is_max: bool,
    pub ref_value: f32,
    pub amin: f32,
    /// Clamp the output to `[max_db - top_db, max_db]`. `None` disables the clamp.
    pub top_db: Option<f32>,
}

impl Default for DbScale {
    fn default() -> Self {
        Self {
            ref_is_max: true,
            ref_value: 1.0,
            amin: 1e-10,
            top_db: Some(80.0),
        }
    }
}

fn to_db(input: &Matrix, scale: &DbScale, factor: f32, pre: impl Fn(f32) -> f32) -> Matrix {
    if input.is_empty() {
        return Matrix::default();
    }
    let mut out = input.clone();
    out.map_inplace(|v| pre(v).max(scale.amin));

    let reference = if scale.ref_is_max {
        out.max().unwrap_or(scale.amin)
    } else {
        scale.ref_value.max(scale.amin)
    };
    out.map_inplace(|v| factor * (v / reference).log10());

    if let Some(top_db) = scale.top_db.filter(|t| *t >= 0.0) {
        if let Some(max_db) = out.max() {
            let lower = max_db - top_db;
            out.map_inplace(|v| v.max(lower));
        }
    }
    out
}

/// `10 * log10(max(S, amin) / ref)` with optional dynamic-range clamp.
pub fn power_to_db(power: &Matrix, scale: &DbScale) -> Matrix {
    to_db(power, scale, 10.0, |v| v)
}

/// `20 * log10(max(|S|, amin) / ref)` with optional dynamic-range clamp.
pub fn amplitude_to_db(magnitude: &Matrix, scale: &DbScale) -> Matrix {
    to_db(magnitude, scale, 20.0, f32::abs)
}

/// Clamp to `[min_db, max_db]` and rescale linearly to `[0, 1]`.
pub fn db_to_unit(db: &Matrix, min_db: f32, max_db: f32) -> Matrix {
    let mut out = db.clone();
    let range = max_db - min_db;
    out.map_inplace(|v| (v.min(max_db).max(min_db) - min_db) / range);
    out
}

/// Replace non-finite cells with `floor` and clamp everything below it.
pub fn floor_db(m: &mut Matrix, floor: f32) {
    m.map_inplace(|v| if v.is_finite() { v.max(floor) } else { floor });
}
