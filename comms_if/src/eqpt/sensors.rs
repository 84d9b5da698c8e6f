//! # Sensor Frames
//!
//! The driver layer buffers raw sensor data and the navigation core polls it once per cycle as a
//! [`SensorFrame`]. Positions are in the local plane with `x` pointing east and `y` north.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// All sensor data available at the start of a cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SensorFrame {
    /// Encoder ticks counted since the last frame
    pub encoders: EncoderDeltas,

    /// True if an IMU was detected at start up
    pub imu_found: bool,

    /// New IMU sample, `None` if no fresh data arrived this cycle
    pub imu: Option<ImuSample>,

    /// New GPS solution, `None` if no fresh solution arrived this cycle
    pub gps: Option<GpsSample>,

    pub bumper: BumperInput,

    pub sonar: SonarInput,

    /// The lift sensor is triggered
    pub lift: bool,

    pub battery: BatteryInput,
}

/// Encoder tick deltas since the previous frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct EncoderDeltas {
    pub left_ticks: i64,
    pub right_ticks: i64,
}

/// Attitude reported by the IMU.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    /// Yaw, counter-clockwise from east
    pub yaw_rad: f64,
    pub pitch_rad: f64,
    pub roll_rad: f64,
}

/// A GPS solution relative to the base station.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsSample {
    pub solution: GpsSolution,

    /// Position north of the base station
    pub north_m: f64,

    /// Position east of the base station
    pub east_m: f64,

    /// Speed over ground
    pub ground_speed_ms: f64,
}

/// Raw bumper contacts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct BumperInput {
    pub left: bool,
    pub right: bool,
}

/// Ultrasonic range readings, `None` meaning no echo.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct SonarInput {
    pub left_m: Option<f64>,
    pub center_m: Option<f64>,
    pub right_m: Option<f64>,
}

/// Battery and charger state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryInput {
    pub charger_connected: bool,
    pub under_voltage: bool,
    pub should_go_home: bool,
    pub charging_completed: bool,

    /// Charger voltage is present but the charge current is implausibly low
    pub bad_charger_contact: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// GPS solution quality.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsSolution {
    Invalid,
    Float,
    Fixed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GpsSolution {
    fn default() -> Self {
        GpsSolution::Invalid
    }
}

impl GpsSolution {
    /// True for FLOAT and FIXED solutions.
    pub fn is_valid(&self) -> bool {
        !matches!(self, GpsSolution::Invalid)
    }
}

impl SonarInput {
    /// Distance to the nearest echo from any transducer.
    pub fn nearest_m(&self) -> Option<f64> {
        [self.left_m, self.center_m, self.right_m]
            .iter()
            .flatten()
            .copied()
            .fold(None, |acc: Option<f64>, d| match acc {
                Some(a) if a <= d => Some(a),
                _ => Some(d),
            })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sonar_nearest() {
        let s = SonarInput::default();
        assert_eq!(s.nearest_m(), None);

        let s = SonarInput {
            left_m: Some(1.2),
            center_m: None,
            right_m: Some(0.4),
        };
        assert_eq!(s.nearest_m(), Some(0.4));
    }
}
