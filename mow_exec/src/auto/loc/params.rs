//! # State estimator parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the state estimator, including the GPS fusion policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocParams {
    /// Encoder ticks per metre of wheel travel
    pub ticks_per_m: f64,

    /// Distance between the drive wheels
    pub wheel_base_m: f64,

    /// Take heading changes from the IMU when one is fitted
    pub use_imu: bool,

    /// Set the position directly from FIXED solutions
    pub use_gps_fix_for_pos: bool,

    /// Set the position directly from FLOAT solutions
    pub use_gps_float_for_pos: bool,

    /// Correct the heading from consecutive FIXED solutions
    pub use_gps_fix_for_heading: bool,

    /// Correct the heading from consecutive FLOAT solutions
    pub use_gps_float_for_heading: bool,

    /// Displacement between samples above which a sample may be a jump
    pub gps_jump_dist_m: f64,

    /// A displacement above the jump distance is only a jump if it happened within this time
    pub gps_jump_window_s: f64,

    /// Minimum displacement between samples to derive a heading from them
    pub gps_heading_min_dist_m: f64,

    /// No GPS heading is derived if the mower turned more than this between samples
    pub gps_heading_max_turn_rad: f64,

    /// No GPS heading is derived while the commanded turn rate is above this
    pub gps_heading_max_ang_speed_rads: f64,

    /// Heading differences above this snap the heading to the GPS heading instead of fusing
    pub gps_heading_snap_rad: f64,

    /// Weight of the current heading in the fusion, the GPS heading gets the remainder
    pub gps_heading_weight: f64,

    /// Smallest linear speed the drive can hold, below half of it the mower is standing still
    pub motor_min_speed_ms: f64,

    /// Time without a fresh IMU sample before the IMU is considered lost
    pub imu_timeout_s: f64,

    /// Roll or pitch above this is reported as a tilt
    pub imu_tilt_limit_rad: f64,

    /// Filter rate of the IMU and wheel yaw rates
    pub yaw_rate_lp_hz: f64,

    /// Filter rate of the heading rate magnitude
    pub abs_yaw_rate_lp_hz: f64,

    /// Filter rate of the IMU/wheel yaw rate difference
    pub yaw_diff_lp_hz: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for LocParams {
    fn default() -> Self {
        Self {
            ticks_per_m: 1646.0,
            wheel_base_m: 0.39,
            use_imu: true,
            use_gps_fix_for_pos: true,
            use_gps_float_for_pos: true,
            use_gps_fix_for_heading: true,
            use_gps_float_for_heading: false,
            gps_jump_dist_m: 0.3,
            gps_jump_window_s: 0.35,
            gps_heading_min_dist_m: 0.1,
            gps_heading_max_turn_rad: 10f64.to_radians(),
            gps_heading_max_ang_speed_rads: 45f64.to_radians(),
            gps_heading_snap_rad: 45f64.to_radians(),
            gps_heading_weight: 0.9,
            motor_min_speed_ms: 0.05,
            imu_timeout_s: 2.0,
            imu_tilt_limit_rad: 45f64.to_radians(),
            yaw_rate_lp_hz: 2.0,
            abs_yaw_rate_lp_hz: 3.0,
            yaw_diff_lp_hz: 1.0,
        }
    }
}
