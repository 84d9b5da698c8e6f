//! # Anomaly detector parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectParams {
    /// Commanded linear speed at or above which the mower should be moving
    pub motor_min_speed_ms: f64,

    /// Commanded turn rate above which a standing mower should be rotating
    pub rotate_min_rads: f64,

    // ---- BUMPER AND LIFT ----
    /// Time the raw contact must be closed before a bumper counts as triggered
    pub bumper_trigger_delay_s: f64,

    /// Minimum time between two bumper reports, also the delay after motion start before the lift
    /// sensor is checked
    pub bumper_deadtime_s: f64,

    /// A bumper held longer than this is considered stuck
    pub bumper_max_trigger_time_s: f64,

    /// Report the lift sensor as an obstacle while moving
    pub lift_obstacle_avoidance: bool,

    // ---- SONAR ----
    pub sonar_enabled: bool,

    /// Echo distance below which the sonar reports an obstacle
    pub sonar_trigger_dist_m: f64,

    // ---- GPS ----
    pub gps_speed_detection: bool,

    /// Settling time after motion start before the ground speed is checked
    pub gps_speed_deadtime_s: f64,

    /// Accumulated low speed time before an obstacle is assumed
    pub gps_speed_delay_s: f64,

    /// Fraction of the commanded speed the ground speed must reach
    pub gps_speed_fraction: f64,

    pub gps_motion_detection: bool,

    /// Period of the position progress check
    pub gps_motion_timeout_s: f64,

    /// Minimum progress in one period
    pub gps_motion_delta_m: f64,

    /// Period after which the progress check runs even if linear and angular motion alternate
    pub overall_motion_timeout_s: f64,

    /// Time motion may pause before the mower is considered stationary
    pub in_motion_hold_s: f64,

    // ---- IMU ----
    /// IMU/wheel yaw rate difference while tracking above which the mower is being deflected
    pub yaw_mismatch_rads: f64,

    /// The yaw mismatch check only runs this far from both waypoints
    pub yaw_mismatch_waypoint_dist_m: f64,

    // ---- ROTATION ----
    pub rotation_detection: bool,

    /// Maximum duration of a rotation on the spot
    pub rotation_timeout_s: f64,

    pub overload_rotation: bool,

    /// Time into a rotation before traction overload counts as a stall
    pub overload_rotation_deadtime_s: f64,

    /// Time into a rotation before the IMU checks apply
    pub rotation_grace_s: f64,

    /// Filtered yaw rate below which a commanded rotation isn't happening
    pub rotation_min_yaw_rate_rads: f64,

    /// Filtered IMU/wheel yaw rate difference above which a rotation is stalled
    pub rotation_yaw_diff_rads: f64,

    /// The free-wheel is behind the drive wheels, so a rotation stall is caused by the back
    pub freewheel_at_back: bool,

    // ---- HARDWARE ----
    pub odometry_error_detection: bool,

    pub overload_detection: bool,

    /// Continuous overload time before it is reported
    pub overload_max_duration_s: f64,

    pub fault_detection: bool,

    // ---- OBSTACLE MARKING ----
    pub mower_radius_front_m: f64,

    pub mower_radius_back_m: f64,

    pub obstacle_diameter_m: f64,

    /// Angle off the heading at which a bumper contact is marked
    pub bumper_angle_rad: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            motor_min_speed_ms: 0.05,
            rotate_min_rads: 4f64.to_radians(),
            bumper_trigger_delay_s: 0.0,
            bumper_deadtime_s: 1.0,
            bumper_max_trigger_time_s: 30.0,
            lift_obstacle_avoidance: true,
            sonar_enabled: true,
            sonar_trigger_dist_m: 0.3,
            gps_speed_detection: true,
            gps_speed_deadtime_s: 3.0,
            gps_speed_delay_s: 5.0,
            gps_speed_fraction: 0.25,
            gps_motion_detection: true,
            gps_motion_timeout_s: 5.0,
            gps_motion_delta_m: 0.05,
            overall_motion_timeout_s: 10.0,
            in_motion_hold_s: 2.0,
            yaw_mismatch_rads: 12f64.to_radians(),
            yaw_mismatch_waypoint_dist_m: 0.25,
            rotation_detection: true,
            rotation_timeout_s: 15.0,
            overload_rotation: true,
            overload_rotation_deadtime_s: 1.0,
            rotation_grace_s: 3.0,
            rotation_min_yaw_rate_rads: 3f64.to_radians(),
            rotation_yaw_diff_rads: 10f64.to_radians(),
            freewheel_at_back: true,
            odometry_error_detection: true,
            overload_detection: true,
            overload_max_duration_s: 10.0,
            fault_detection: true,
            mower_radius_front_m: 0.3,
            mower_radius_back_m: 0.3,
            obstacle_diameter_m: 0.1,
            bumper_angle_rad: 35f64.to_radians(),
        }
    }
}
