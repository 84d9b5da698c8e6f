//! # Kinematic simulator
//!
//! [`SimRobot`] stands in for the driver layer when running without hardware. It integrates the
//! speed demands of a differential drive mower and produces the [`SensorFrame`] the navigation
//! core would poll from real sensors:
//!
//! - Encoder ticks from the wheel distances, keeping fractional ticks between steps
//! - IMU yaw equal to the true heading
//! - GPS solutions at a fixed rate
//! - Bumper contacts from circular obstacles, which also stop the mower
//! - Charger contact at the dock, with a simple battery runtime model
//!
//! Driver requests from the navigation core are serviced too: a GPS reboot silences the receiver
//! for a while and brings it back with a float solution first, an IMU restart drops the IMU
//! samples briefly.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use nalgebra::Vector2;
use serde::Deserialize;

use comms_if::eqpt::{
    drive::DriveStatus,
    sensors::{
        BatteryInput, BumperInput, EncoderDeltas, GpsSample, GpsSolution, ImuSample, SensorFrame,
    },
};
use util::maths::normalize_angle;

use crate::{context::DriverRequests, drive::Drive};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Start pose as `[x, y, heading]`
    pub start_pose: [f64; 3],

    pub ticks_per_m: f64,
    pub wheel_base_m: f64,

    /// Acceleration limit for ramped speed demands
    pub accel_mss: f64,
    pub angular_accel_radss: f64,

    /// Distance from the centre to the bumper
    pub bumper_radius_m: f64,

    pub imu_found: bool,

    pub gps_period_s: f64,
    pub gps_solution: GpsSolution,

    /// Obstacles as `[x, y, radius]`
    pub obstacles: Vec<[f64; 3]>,

    /// Position of the charging contact
    pub charger_position: Option<[f64; 2]>,
    pub charger_contact_radius_m: f64,

    /// Time on the charger until charging completes
    pub charge_time_s: f64,

    /// Driving time on a full battery before the mower should go home
    pub battery_runtime_s: Option<f64>,

    /// Duration of the slow retry after a high grass escape
    pub retry_slow_s: f64,

    /// Time without any GPS output after a receiver reboot
    pub gps_reboot_s: f64,

    /// Time on a float solution after the receiver comes back
    pub gps_refix_s: f64,

    /// Time without IMU samples after a restart
    pub imu_restart_s: f64,
}

/// Kinematic differential drive mower.
pub struct SimRobot {
    params: SimParams,

    time_s: f64,
    position_m: Vector2<f64>,
    heading_rad: f64,

    linear_set_ms: f64,
    angular_set_rads: f64,
    use_ramp: bool,
    linear_ms: f64,
    angular_rads: f64,
    mow_on: bool,

    /// Fractional encoder ticks carried to the next step
    left_carry: f64,
    right_carry: f64,

    next_gps_s: f64,

    charging_s: f64,
    driving_s: f64,
    retry_slow_until_s: f64,

    /// Number of stops without ramp, as seen by the drive
    emergency_stops: u32,

    /// Last driver requests acted upon
    serviced: DriverRequests,
    gps_down_until_s: f64,
    gps_float_until_s: f64,
    imu_down_until_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for SimParams {
    fn default() -> Self {
        Self {
            start_pose: [0.0, 0.0, 0.0],
            ticks_per_m: 1646.0,
            wheel_base_m: 0.39,
            accel_mss: 0.5,
            angular_accel_radss: 2.0,
            bumper_radius_m: 0.3,
            imu_found: true,
            gps_period_s: 0.2,
            gps_solution: GpsSolution::Fixed,
            obstacles: Vec::new(),
            charger_position: None,
            charger_contact_radius_m: 0.1,
            charge_time_s: 60.0,
            battery_runtime_s: None,
            retry_slow_s: 10.0,
            gps_reboot_s: 5.0,
            gps_refix_s: 10.0,
            imu_restart_s: 0.5,
        }
    }
}

impl SimRobot {
    pub fn new(params: SimParams) -> Self {
        let [x, y, heading] = params.start_pose;

        info!(
            "Simulated mower at ({:.2}, {:.2}), {} obstacles",
            x,
            y,
            params.obstacles.len()
        );

        Self {
            params,
            time_s: 0.0,
            position_m: Vector2::new(x, y),
            heading_rad: normalize_angle(heading),
            linear_set_ms: 0.0,
            angular_set_rads: 0.0,
            use_ramp: false,
            linear_ms: 0.0,
            angular_rads: 0.0,
            mow_on: false,
            left_carry: 0.0,
            right_carry: 0.0,
            next_gps_s: 0.0,
            charging_s: 0.0,
            driving_s: 0.0,
            retry_slow_until_s: 0.0,
            emergency_stops: 0,
            serviced: DriverRequests::default(),
            gps_down_until_s: 0.0,
            gps_float_until_s: 0.0,
            imu_down_until_s: 0.0,
        }
    }

    pub fn position_m(&self) -> Vector2<f64> {
        self.position_m
    }

    pub fn heading_rad(&self) -> f64 {
        self.heading_rad
    }

    pub fn emergency_stops(&self) -> u32 {
        self.emergency_stops
    }

    /// Act on any new GPS reboot or IMU restart requests.
    pub fn service_requests(&mut self, requests: DriverRequests) {
        if requests.gps_reboots > self.serviced.gps_reboots {
            info!("Rebooting the simulated GPS receiver");
            self.gps_down_until_s = self.time_s + self.params.gps_reboot_s;
            self.gps_float_until_s = self.gps_down_until_s + self.params.gps_refix_s;
        }
        if requests.imu_restarts > self.serviced.imu_restarts {
            info!("Restarting the simulated IMU");
            self.imu_down_until_s = self.time_s + self.params.imu_restart_s;
        }

        self.serviced = requests;
    }

    /// Advance the simulation by `dt_s` and return the sensor frame seen at the end of the step.
    pub fn step(&mut self, dt_s: f64) -> SensorFrame {
        self.time_s += dt_s;
        self.update_speeds(dt_s);

        // ---- KINEMATICS ----

        let half_base_m = self.params.wheel_base_m / 2.0;
        let mut left_m = (self.linear_ms - self.angular_rads * half_base_m) * dt_s;
        let mut right_m = (self.linear_ms + self.angular_rads * half_base_m) * dt_s;

        let dist_m = (left_m + right_m) / 2.0;
        let new_heading_rad = self.heading_rad + (right_m - left_m) / self.params.wheel_base_m;
        let new_position_m = self.position_m
            + dist_m * Vector2::new(self.heading_rad.cos(), self.heading_rad.sin());

        // Driving forward into an obstacle keeps the position and leaves the wheels still
        let contacts = self.bumper_at(&new_position_m, new_heading_rad);
        if dist_m > 0.0 && contacts.any() {
            left_m = 0.0;
            right_m = 0.0;
        } else {
            self.position_m = new_position_m;
            self.heading_rad = normalize_angle(new_heading_rad);
        }

        let encoders = EncoderDeltas {
            left_ticks: take_ticks(&mut self.left_carry, left_m * self.params.ticks_per_m),
            right_ticks: take_ticks(&mut self.right_carry, right_m * self.params.ticks_per_m),
        };

        // ---- SENSORS ----

        let imu = if self.params.imu_found && self.time_s >= self.imu_down_until_s {
            Some(ImuSample {
                yaw_rad: self.heading_rad,
                pitch_rad: 0.0,
                roll_rad: 0.0,
            })
        } else {
            None
        };

        let gps = if self.time_s >= self.next_gps_s && self.time_s >= self.gps_down_until_s {
            self.next_gps_s = self.time_s + self.params.gps_period_s;

            let solution = if self.time_s < self.gps_float_until_s {
                GpsSolution::Float
            } else {
                self.params.gps_solution
            };

            Some(GpsSample {
                solution,
                north_m: self.position_m[1],
                east_m: self.position_m[0],
                ground_speed_ms: self.linear_ms.abs(),
            })
        } else {
            None
        };

        SensorFrame {
            encoders,
            imu_found: self.params.imu_found,
            imu,
            gps,
            bumper: contacts.into(),
            battery: self.battery(dt_s),
            ..Default::default()
        }
    }

    /// Move the actual speeds towards the demands.
    fn update_speeds(&mut self, dt_s: f64) {
        if self.use_ramp {
            self.linear_ms = ramp(
                self.linear_ms,
                self.linear_set_ms,
                self.params.accel_mss * dt_s,
            );
            self.angular_rads = ramp(
                self.angular_rads,
                self.angular_set_rads,
                self.params.angular_accel_radss * dt_s,
            );
        } else {
            self.linear_ms = self.linear_set_ms;
            self.angular_rads = self.angular_set_rads;
        }
    }

    /// Bumper contacts for the mower at the given pose.
    fn bumper_at(&self, position_m: &Vector2<f64>, heading_rad: f64) -> Contacts {
        let mut contacts = Contacts::default();

        for [x, y, r] in self.params.obstacles.iter().copied() {
            let offset_m = Vector2::new(x, y) - position_m;
            if offset_m.norm() > r + self.params.bumper_radius_m {
                continue;
            }

            // Only the front half of the mower carries a bumper
            let bearing_rad = normalize_angle(offset_m[1].atan2(offset_m[0]) - heading_rad);
            if bearing_rad.abs() > std::f64::consts::FRAC_PI_2 {
                continue;
            }

            if bearing_rad >= 0.0 {
                contacts.left = true;
            } else {
                contacts.right = true;
            }
        }

        contacts
    }

    fn battery(&mut self, dt_s: f64) -> BatteryInput {
        let charger_connected = match self.params.charger_position {
            Some([x, y]) => {
                (self.position_m - Vector2::new(x, y)).norm()
                    < self.params.charger_contact_radius_m
            }
            None => false,
        };

        if charger_connected {
            self.charging_s += dt_s;
            if self.charging_s >= self.params.charge_time_s && self.driving_s > 0.0 {
                debug!("Battery full");
                self.driving_s = 0.0;
            }
        } else {
            self.charging_s = 0.0;
            if self.linear_ms != 0.0 || self.angular_rads != 0.0 {
                self.driving_s += dt_s;
            }
        }

        BatteryInput {
            charger_connected,
            under_voltage: false,
            should_go_home: self
                .params
                .battery_runtime_s
                .map_or(false, |r| self.driving_s > r),
            charging_completed: charger_connected && self.charging_s >= self.params.charge_time_s,
            bad_charger_contact: false,
        }
    }
}

impl Drive for SimRobot {
    fn set_linear_angular_speed(&mut self, linear_ms: f64, angular_rads: f64, use_ramp: bool) {
        self.linear_set_ms = linear_ms;
        self.angular_set_rads = angular_rads;
        self.use_ramp = use_ramp;
    }

    fn set_mow_state(&mut self, on: bool) {
        if on != self.mow_on {
            debug!("Mow motor {}", if on { "on" } else { "off" });
        }
        self.mow_on = on;
    }

    fn linear_set_ms(&self) -> f64 {
        self.linear_set_ms
    }

    fn angular_set_rads(&self) -> f64 {
        self.angular_set_rads
    }

    fn status(&self) -> DriveStatus {
        DriveStatus {
            mow_on: self.mow_on,
            retry_slow: self.time_s < self.retry_slow_until_s,
            ..Default::default()
        }
    }

    fn trigger_retry_slow(&mut self) {
        self.retry_slow_until_s = self.time_s + self.params.retry_slow_s;
    }

    fn stop_immediately(&mut self) {
        self.emergency_stops += 1;
        self.set_linear_angular_speed(0.0, 0.0, false);
        self.linear_ms = 0.0;
        self.angular_rads = 0.0;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Contacts {
    left: bool,
    right: bool,
}

impl Contacts {
    fn any(&self) -> bool {
        self.left || self.right
    }
}

impl From<Contacts> for BumperInput {
    fn from(c: Contacts) -> Self {
        BumperInput {
            left: c.left,
            right: c.right,
        }
    }
}

/// Add `ticks` to the carry and remove the whole ticks from it.
fn take_ticks(carry: &mut f64, ticks: f64) -> i64 {
    *carry += ticks;
    let whole = carry.trunc();
    *carry -= whole;
    whole as i64
}

/// Step `current` towards `target` by at most `max_step`.
fn ramp(current: f64, target: f64, max_step: f64) -> f64 {
    current + (target - current).clamp(-max_step, max_step)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_straight_line_ticks() {
        let mut sim = SimRobot::new(SimParams::default());
        sim.set_linear_angular_speed(0.3, 0.0, false);

        let mut left = 0;
        let mut right = 0;
        for _ in 0..100 {
            let f = sim.step(0.01);
            left += f.encoders.left_ticks;
            right += f.encoders.right_ticks;
        }

        // 0.3 m at 1646 ticks/m
        assert!((left - 494).abs() <= 1, "left = {}", left);
        assert_eq!(left, right);
        assert!((sim.position_m()[0] - 0.3).abs() < 1e-6);
        assert!(sim.position_m()[1].abs() < 1e-9);
    }

    #[test]
    fn test_ramp() {
        let mut sim = SimRobot::new(SimParams::default());
        sim.set_linear_angular_speed(0.3, 0.0, true);

        sim.step(0.1);
        assert!((sim.linear_ms - 0.05).abs() < 1e-9);

        sim.stop_immediately();
        sim.step(0.1);
        assert_eq!(sim.linear_ms, 0.0);
        assert_eq!(sim.emergency_stops(), 1);
    }

    #[test]
    fn test_turn_on_the_spot() {
        let mut sim = SimRobot::new(SimParams::default());
        sim.set_linear_angular_speed(0.0, 0.5, false);

        let mut f = SensorFrame::default();
        for _ in 0..100 {
            f = sim.step(0.01);
        }

        assert!((sim.heading_rad() - 0.5).abs() < 1e-9);
        assert!(sim.position_m().norm() < 1e-9);
        assert!((f.imu.unwrap().yaw_rad - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bumper_stops_mower() {
        let mut sim = SimRobot::new(SimParams {
            obstacles: vec![[1.0, 0.2, 0.2]],
            ..Default::default()
        });
        sim.set_linear_angular_speed(0.5, 0.0, false);

        let mut f = SensorFrame::default();
        for _ in 0..300 {
            f = sim.step(0.01);
        }

        // Obstacle is ahead and to the left
        assert!(f.bumper.left);
        assert!(!f.bumper.right);
        assert_eq!(f.encoders.left_ticks, 0);
        assert!(sim.position_m()[0] < 1.0);
    }

    #[test]
    fn test_gps_rate() {
        let mut sim = SimRobot::new(SimParams {
            gps_period_s: 0.25,
            ..Default::default()
        });

        let samples = (0..16).filter(|_| sim.step(0.125).gps.is_some()).count();
        assert_eq!(samples, 8);
    }

    #[test]
    fn test_charger_contact() {
        let mut sim = SimRobot::new(SimParams {
            start_pose: [0.0, 0.0, 0.0],
            charger_position: Some([0.0, 0.0]),
            charge_time_s: 1.0,
            ..Default::default()
        });

        let f = sim.step(0.5);
        assert!(f.battery.charger_connected);
        assert!(!f.battery.charging_completed);

        let f = sim.step(0.6);
        assert!(f.battery.charging_completed);
    }

    #[test]
    fn test_gps_reboot() {
        let mut sim = SimRobot::new(SimParams {
            gps_period_s: 0.25,
            gps_reboot_s: 1.0,
            gps_refix_s: 1.0,
            ..Default::default()
        });
        sim.step(0.25);

        let mut requests = DriverRequests::default();
        requests.gps_reboots += 1;
        sim.service_requests(requests);

        // Silent while rebooting
        assert!((0..3).all(|_| sim.step(0.25).gps.is_none()));

        let solutions: Vec<GpsSolution> = (0..9)
            .filter_map(|_| sim.step(0.25).gps.map(|g| g.solution))
            .collect();
        assert_eq!(solutions.first(), Some(&GpsSolution::Float));
        assert_eq!(solutions.last(), Some(&GpsSolution::Fixed));

        // The same request is not serviced twice
        sim.service_requests(requests);
        assert!(sim.step(0.25).gps.is_some());
    }

    #[test]
    fn test_imu_restart() {
        let mut sim = SimRobot::new(SimParams {
            imu_restart_s: 0.5,
            ..Default::default()
        });

        sim.service_requests(DriverRequests {
            gps_reboots: 0,
            imu_restarts: 1,
        });

        assert!(sim.step(0.25).imu.is_none());
        assert!(sim.step(0.5).imu.is_some());
    }
}
