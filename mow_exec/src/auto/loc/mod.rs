//! # Localisation module
//!
//! This module provides the mower's pose and speed estimate. The [`StateEstimator`] dead-reckons
//! from wheel odometry, takes heading changes from the IMU when one is fitted, and corrects both
//! position and heading from RTK GPS when the solution quality and the fusion policy allow it.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod estimator;
mod params;

pub use estimator::{EstimatorInput, EstimatorReport, LocError, StateEstimator};
pub use params::LocParams;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use util::maths::normalize_angle;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The current pose of the mower in the local plane.
///
/// `x` points east and `y` north. The heading is measured counter-clockwise from east and is
/// always kept in (-pi, pi].
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Pose {
    /// The position in the local plane
    pub position_m: Vector2<f64>,

    heading_rad: f64,
}

/// Speeds derived from the pose deltas and the raw sensor deltas of the last cycle.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SpeedState {
    /// Forward speed from odometry
    pub linear_ms: f64,

    /// Rate of change of the estimated heading
    pub angular_rads: f64,

    /// Speed over ground reported by the GPS
    pub ground_speed_ms: f64,

    /// Low pass filtered IMU yaw rate
    pub yaw_rate_imu_rads: f64,

    /// Low pass filtered yaw rate from wheel odometry
    pub yaw_rate_wheels_rads: f64,

    /// Low pass filtered magnitude of the estimated heading rate
    pub yaw_rate_lp_rads: f64,

    /// Low pass filtered magnitude of the difference between IMU and wheel yaw rates
    pub yaw_diff_lp_rads: f64,
}

/// A GPS sample which moved too far, too quickly, to be believed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GpsJump {
    /// Distance from the previous reference sample
    pub distance_m: f64,

    /// Time since the previous sample
    pub dt_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(x_m: f64, y_m: f64, heading_rad: f64) -> Self {
        Self {
            position_m: Vector2::new(x_m, y_m),
            heading_rad: normalize_angle(heading_rad),
        }
    }

    pub fn x_m(&self) -> f64 {
        self.position_m[0]
    }

    pub fn y_m(&self) -> f64 {
        self.position_m[1]
    }

    /// Return the heading (angle to the positive x axis) in (-pi, pi].
    pub fn heading_rad(&self) -> f64 {
        self.heading_rad
    }

    /// Set the heading, normalising it into (-pi, pi].
    pub fn set_heading(&mut self, heading_rad: f64) {
        self.heading_rad = normalize_angle(heading_rad);
    }

    /// Unit vector pointing along the heading.
    pub fn forward2(&self) -> Vector2<f64> {
        Vector2::new(self.heading_rad.cos(), self.heading_rad.sin())
    }

    pub fn distance_to(&self, point_m: &Vector2<f64>) -> f64 {
        (point_m - self.position_m).norm()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_pose_heading_normalised() {
        let mut pose = Pose::new(1.0, 2.0, 3.0 * PI / 2.0);
        assert!((pose.heading_rad() + PI / 2.0).abs() < 1e-9);

        pose.set_heading(-PI);
        assert!((pose.heading_rad() - PI).abs() < 1e-9);

        assert!((pose.distance_to(&Vector2::new(4.0, 6.0)) - 5.0).abs() < 1e-9);
    }
}
