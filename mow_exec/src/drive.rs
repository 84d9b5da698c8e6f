//! # Drive interface
//!
//! The traction and mow motors are driven by a lower level subsystem. The navigation core only
//! sets speed demands and reads back status flags through the [`Drive`] trait.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::drive::DriveStatus;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait Drive {
    /// Demand a linear (m/s) and angular (rad/s, counter-clockwise) speed.
    ///
    /// With `use_ramp` the drive accelerates towards the demand, otherwise it is applied at once.
    fn set_linear_angular_speed(&mut self, linear_ms: f64, angular_rads: f64, use_ramp: bool);

    fn set_mow_state(&mut self, on: bool);

    /// The linear speed currently demanded.
    fn linear_set_ms(&self) -> f64;

    /// The angular speed currently demanded.
    fn angular_set_rads(&self) -> f64;

    fn status(&self) -> DriveStatus;

    /// Drive slowly for a while after an escape from high grass.
    fn trigger_retry_slow(&mut self);

    /// Stop the traction motors without ramping.
    fn stop_immediately(&mut self);
}

// ------------------------------------------------------------------------------------------------
// MOCK
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Drive recording every distinct speed demand.
    #[derive(Debug, Default)]
    pub struct RecordingDrive {
        pub linear_ms: f64,
        pub angular_rads: f64,
        pub mow_on: bool,
        pub status: DriveStatus,

        /// Speed demands, consecutive duplicates removed
        pub commands: Vec<(f64, f64)>,

        pub retry_slow_triggers: u32,
        pub emergency_stops: u32,
    }

    impl Drive for RecordingDrive {
        fn set_linear_angular_speed(&mut self, linear_ms: f64, angular_rads: f64, _use_ramp: bool) {
            self.linear_ms = linear_ms;
            self.angular_rads = angular_rads;

            if self.commands.last() != Some(&(linear_ms, angular_rads)) {
                self.commands.push((linear_ms, angular_rads));
            }
        }

        fn set_mow_state(&mut self, on: bool) {
            self.mow_on = on;
            self.status.mow_on = on;
        }

        fn linear_set_ms(&self) -> f64 {
            self.linear_ms
        }

        fn angular_set_rads(&self) -> f64 {
            self.angular_rads
        }

        fn status(&self) -> DriveStatus {
            self.status
        }

        fn trigger_retry_slow(&mut self) {
            self.retry_slow_triggers += 1;
        }

        fn stop_immediately(&mut self) {
            self.emergency_stops += 1;
            self.set_linear_angular_speed(0.0, 0.0, false);
        }
    }
}
