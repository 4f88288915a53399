//! Gain conversion and output-stage saturation helpers.

/// Linear gain below which a signal is reported at the silence floor.
const SILENCE_FLOOR_LINEAR: f64 = 1e-12;

/// Converts a gain in decibels to a linear multiplier.
///
/// `db_to_linear(0.0)` is exactly `1.0`.
#[must_use]
pub fn db_to_linear(db: f32) -> f32 {
    10f64.powf(f64::from(db) / 20.0) as f32
}

/// Converts a linear gain to decibels.
///
/// The input is floored at a tiny positive value so that silence maps to a
/// large negative sentinel (-240 dB) instead of `-inf` or `NaN`.
#[must_use]
pub fn linear_to_db(linear: f32) -> f32 {
    let floored = f64::from(linear).max(SILENCE_FLOOR_LINEAR);
    (20.0 * floored.log10()) as f32
}

/// Soft saturation for the matrix output stage.
///
/// `tanh` stays essentially linear below ~0.3 and compresses gently toward
/// ±1.0, so stacked routes cannot produce hard digital clipping.
#[inline]
#[must_use]
pub fn soft_clip(x: f32) -> f32 {
    x.tanh()
}
