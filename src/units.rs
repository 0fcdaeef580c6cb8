//! Conversion between milliseconds and the device's native microsecond register encoding.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Device ticks per millisecond.
pub const US_PER_MS: f64 = 1e3;

// Products such as `4.35 * 1e3` land a hair below the intended integer; anything within this
// distance of an integer is taken to be that integer before truncating.
const FLOAT_NOISE: f64 = 1e-4;

// Quantized exposures are snapped to this many decimal places, so 0.001 steps read back as
// 12.345 rather than 12.345000000000001.
const DECIMAL_SNAP: f64 = 1e9;

/// Tie-breaking rule used when quantizing an exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    #[default]
    HalfAwayFromZero,
    HalfEven,
}

impl Rounding {
    fn apply(self, value: f64) -> f64 {
        match self {
            Self::HalfAwayFromZero => value.round(),
            Self::HalfEven => value.round_ties_even(),
        }
    }
}

/// Convert milliseconds into whole microseconds, truncating any fraction.
///
/// A product within 1e-4 µs of an integer is rounded to it instead, so `4.35` gives 4350.
pub fn to_device_units(ms: f64) -> Result<u32> {
    let us = ms * US_PER_MS;
    let nearest = us.round();
    let us = if (us - nearest).abs() < FLOAT_NOISE { nearest } else { us.trunc() };
    if !us.is_finite() || us < 0.0 || us > u32::MAX as f64 {
        return Err(Error::OutOfRange(ms))
    }
    Ok(us as u32)
}

pub fn from_device_units(us: u32) -> f64 {
    us as f64 / US_PER_MS
}

/// Round `ms` to the nearest multiple of `step_ms`.
///
/// Negative or non-finite exposures are rejected, as is a step that is not strictly positive.
pub fn quantize_exposure(ms: f64, step_ms: f64, rounding: Rounding) -> Result<f64> {
    if !ms.is_finite() || ms < 0.0 || !(step_ms > 0.0) {
        return Err(Error::InvalidExposure(ms))
    }
    let quantized = rounding.apply(ms / step_ms) * step_ms;
    let scaled = quantized * DECIMAL_SNAP;
    if scaled < (1u64 << f64::MANTISSA_DIGITS) as f64 {
        Ok(scaled.round() / DECIMAL_SNAP)
    } else {
        Ok(quantized)
    }
}
