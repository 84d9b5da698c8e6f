//! # Navigation Telemetry

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::eqpt::sensors::GpsSolution;

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

/// Summary of the navigation core state, produced once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NavTm {
    /// Name of the active operation
    pub op: String,

    /// Name of the outermost pending goal, equal to `op` if nothing is pending
    pub goal: String,

    /// Active operation followed by all pending goals, e.g. `ImuCalibration->GpsWaitFix->Mow`
    pub chain: String,

    pub x_m: f64,
    pub y_m: f64,
    pub heading_rad: f64,

    pub gps_solution: GpsSolution,
    pub gps_jumps: u32,

    /// Reason for the most recent escalation, `None` if nothing has gone wrong
    pub error_cause: String,

    pub counters: AnomalyCounters,

    /// Number of operation changes since start up
    pub transitions: u64,
}

/// Number of times each anomaly has been reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AnomalyCounters {
    pub bumper: u32,
    pub sonar: u32,
    pub lift: u32,
    pub gps_motion_timeout: u32,
    pub gps_no_speed: u32,
    pub rotation_timeout: u32,
    pub imu_no_rotation_speed: u32,
    pub yaw_mismatch: u32,
    pub obstacles: u32,
}
