//! Line tracker parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the line tracker
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    /// Distance to the target under which it counts as reached
    pub target_reached_tolerance_m: f64,

    // ---- ROTATE-TO-TARGET ----
    /// Within this distance of either waypoint the tighter fit angle applies
    pub waypoint_rotate_dist_m: f64,

    /// Further than this from the segment the tighter fit angle applies
    pub off_path_dist_m: f64,

    /// Heading error tolerated near waypoints or off the path before rotating on the spot
    pub transition_angle_rad: f64,

    /// Heading error tolerated mid-segment before rotating on the spot
    pub mid_segment_fit_angle_rad: f64,

    /// Heading error under which a rotation on the spot is complete
    pub angle_precise_rad: f64,

    /// Use a continuous rotation speed ramp instead of speed tiers
    pub rotation_ramp: bool,
    pub rotation_ramp_min_rads: f64,
    pub rotation_ramp_max_rads: f64,

    /// Heading errors at or above this rotate at the first tier speed
    pub angle_diff_1_rad: f64,

    /// Heading errors at or below this rotate at the third tier speed
    pub angle_diff_2_rad: f64,

    pub rotate_speed_1_rads: f64,
    pub rotate_speed_2_rads: f64,
    pub rotate_speed_3_rads: f64,

    // ---- STANLEY ----
    pub stanley_normal: StanleyGains,
    pub stanley_slow: StanleyGains,

    /// Normal gains used without a FIXED solution
    pub stanley_float_normal: StanleyGains,

    /// Slow gains used without a FIXED solution
    pub stanley_float_slow: StanleyGains,

    /// Interpolate the gains between the slow and normal sets by speed
    pub map_stanley_control: bool,

    /// Steering output limit
    pub max_steering_rad: f64,

    pub motor_min_speed_ms: f64,
    pub motor_max_speed_ms: f64,

    // ---- SPEED LIMITS ----
    pub float_speed_ms: f64,

    /// Within this distance of either waypoint the near waypoint speed applies
    pub near_waypoint_dist_m: f64,
    pub near_waypoint_speed_ms: f64,

    /// Nearest sonar echo under which the sonar speed applies
    pub sonar_near_dist_m: f64,
    pub sonar_speed_ms: f64,
    pub overload_speed_ms: f64,
    pub keep_slow_speed_ms: f64,
    pub retry_slow_speed_ms: f64,
    pub track_slow_speed_ms: f64,
    pub dock_no_rotation_speed_ms: f64,
    pub dock_path_speed_ms: f64,

    /// Speed on the way to the dock path
    pub dock_speed_ms: f64,

    /// Ramp the speed down approaching, and up leaving, a waypoint
    pub distance_ramp: bool,
    pub distance_ramp_min_speed_ms: f64,

    /// Lowest ramp speed if the next segment continues straight ahead
    pub transition_speed_ms: f64,

    // ---- GPS ----
    /// Time without a FIXED solution before a fix timeout is raised, disabled if not set
    pub fix_timeout_s: Option<f64>,

    pub kidnap_detect: bool,

    /// Distance from the segment beyond which the mower is considered kidnapped
    pub kidnap_path_tolerance_m: f64,

    /// Distance from the segment beyond which the mower is considered kidnapped near the dock
    pub kidnap_path_tolerance_dock_m: f64,

    /// Within this distance of the dock the dock tolerance applies while (un)docking
    pub kidnap_dock_dist_m: f64,

    /// Raise the GPS reboot event at the reboot point of the dock path
    pub dock_gps_reboot: bool,

    // ---- DOCKING ----
    /// Approach the charging contact and leave it in a straight line
    pub dock_no_rotation: bool,

    /// Past this distance from the second to last dock point the approach is a straight crawl
    pub dock_no_rotation_dist_m: f64,

    /// Time allowed for the straight approach or departure
    pub dock_no_rotation_timeout_s: f64,
}

/// A Stanley controller gain set.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StanleyGains {
    /// Cross track gain
    pub k: f64,

    /// Heading gain
    pub p: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            target_reached_tolerance_m: 0.1,
            waypoint_rotate_dist_m: 0.3,
            off_path_dist_m: 1.0,
            transition_angle_rad: 15f64.to_radians(),
            mid_segment_fit_angle_rad: 45f64.to_radians(),
            angle_precise_rad: 2f64.to_radians(),
            rotation_ramp: false,
            rotation_ramp_min_rads: 20f64.to_radians(),
            rotation_ramp_max_rads: 60f64.to_radians(),
            angle_diff_1_rad: 30f64.to_radians(),
            angle_diff_2_rad: 10f64.to_radians(),
            rotate_speed_1_rads: 45f64.to_radians(),
            rotate_speed_2_rads: 25f64.to_radians(),
            rotate_speed_3_rads: 10f64.to_radians(),
            stanley_normal: StanleyGains { k: 1.0, p: 3.0 },
            stanley_slow: StanleyGains { k: 0.1, p: 3.0 },
            stanley_float_normal: StanleyGains { k: 0.5, p: 2.0 },
            stanley_float_slow: StanleyGains { k: 0.1, p: 2.0 },
            map_stanley_control: false,
            max_steering_rad: 30f64.to_radians(),
            motor_min_speed_ms: 0.05,
            motor_max_speed_ms: 0.5,
            float_speed_ms: 0.2,
            near_waypoint_dist_m: 0.5,
            near_waypoint_speed_ms: 0.15,
            sonar_near_dist_m: 0.6,
            sonar_speed_ms: 0.1,
            overload_speed_ms: 0.15,
            keep_slow_speed_ms: 0.1,
            retry_slow_speed_ms: 0.1,
            track_slow_speed_ms: 0.1,
            dock_no_rotation_speed_ms: 0.1,
            dock_path_speed_ms: 0.2,
            dock_speed_ms: 0.25,
            distance_ramp: false,
            distance_ramp_min_speed_ms: 0.05,
            transition_speed_ms: 0.15,
            fix_timeout_s: Some(60.0),
            kidnap_detect: true,
            kidnap_path_tolerance_m: 3.0,
            kidnap_path_tolerance_dock_m: 5.0,
            kidnap_dock_dist_m: 5.0,
            dock_gps_reboot: true,
            dock_no_rotation: true,
            dock_no_rotation_dist_m: 0.5,
            dock_no_rotation_timeout_s: 30.0,
        }
    }
}
