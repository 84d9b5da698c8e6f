//! Utility maths functions
//!
//! Angles are in radians throughout. Headings are kept in the half-open interval (-pi, pi].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// First order low pass filter.
///
/// The filter coefficient is `1 - rate_hz * dt_s`, clamped to [0, 1], so the filtered value always
/// lies between its previous value and the new raw sample.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LowPass {
    /// Filter rate, higher is faster.
    pub rate_hz: f64,

    value: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LowPass {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            rate_hz,
            value: 0.0,
        }
    }

    /// Feed a raw sample taken `dt_s` seconds after the last one and return the filtered value.
    pub fn update(&mut self, raw: f64, dt_s: f64) -> f64 {
        let k = (1.0 - self.rate_hz * dt_s).clamp(0.0, 1.0);
        self.value = k * self.value + (1.0 - k) * raw;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Normalise an angle into (-pi, pi].
pub fn normalize_angle(angle_rad: f64) -> f64 {
    let wrapped = (angle_rad + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Signed shortest angular distance going from `from_rad` to `to_rad`.
///
/// Positive means counter-clockwise.
pub fn ang_dist(from_rad: f64, to_rad: f64) -> f64 {
    normalize_angle(to_rad - from_rad)
}

/// Weighted circular mean of two angles.
///
/// `weight` is given to `current_rad` and `1 - weight` to `new_rad`. The mean is computed on unit
/// vectors so wrapping at +/-pi doesn't bias the result.
pub fn fuse_angles(current_rad: f64, new_rad: f64, weight: f64) -> f64 {
    let x = weight * current_rad.cos() + (1.0 - weight) * new_rad.cos();
    let y = weight * current_rad.sin() + (1.0 - weight) * new_rad.sin();

    normalize_angle(y.atan2(x))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
