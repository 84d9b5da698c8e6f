//! # Drive Equipment Status

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Status flags reported by the drive subsystem (traction and mow motors).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveStatus {
    /// A traction or mow motor is currently overloaded
    pub overload: bool,

    /// How long the current overload has lasted
    pub overload_duration_s: f64,

    /// A motor driver reported a fault
    pub motor_fault: bool,

    /// The wheel encoders disagree with the commanded motion
    pub odometry_error: bool,

    /// The mow motor has stalled in long grass
    pub mow_stall: bool,

    /// The drive is limiting speed after a previous mow stall
    pub keep_slow: bool,

    /// The drive is limiting speed while retrying after an escape
    pub retry_slow: bool,

    /// The mow motor is switched on
    pub mow_on: bool,
}
