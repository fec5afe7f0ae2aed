//! Fixed-scale conversion between the S16 wire domain and the normalized
//! f32 processing domain.
//!
//! The scale is a compile-time constant, `1/32768`, in both directions.
//! Because every i16 is exactly representable in f32 and the scale is a
//! power of two, `s16_to_sample` followed by `sample_to_s16` reproduces
//! the original wire sample bit-exactly.

/// Full-scale magnitude of the 16-bit wire domain.
pub const S16_FULL_SCALE: f32 = 32768.0;

/// Wire sample to a normalized processing-domain sample in `[-1.0, 1.0)`.
#[inline]
pub fn s16_to_sample(v: i16) -> f32 {
    f32::from(v) * (1.0 / S16_FULL_SCALE)
}

/// Processing-domain sample back to the wire domain, clamped to full scale
/// and rounded to nearest with ties away from zero.
#[inline]
pub fn sample_to_s16(v: f32) -> i16 {
    let scaled = (v * S16_FULL_SCALE).clamp(-32768.0, 32767.0);
    (scaled + f32::copysign(0.5, scaled)) as i16
}
