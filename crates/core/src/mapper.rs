//! Linear interpolation used by the servo responder.

/// Map `x` from `[in_min, in_max]` onto `[out_min, out_max]`.
///
/// `out_min + round((out_max - out_min) / (in_max - in_min) × (x - in_min))`,
/// evaluated in `f32`. Inputs outside the input range extrapolate linearly;
/// results below zero saturate at 0. A degenerate input range returns
/// `out_min`.
pub fn linear_map(x: u8, in_min: u8, in_max: u8, out_min: u16, out_max: u16) -> u16 {
    if in_max == in_min {
        return out_min;
    }
    let slope = (out_max as f32 - out_min as f32) / (in_max as f32 - in_min as f32);
    let offset = (slope * (x as f32 - in_min as f32)).round();
    (out_min as f32 + offset) as u16
}
