//! # Anomaly detection module
//!
//! The [`AnomalyDetector`] watches the bumpers, sonar, lift sensor, GPS progress, IMU/wheel yaw
//! consistency and drive status while the mower is line tracking, and reports at most one
//! [`AnomalyEvent`] per cycle. When several conditions hold at once the event is chosen in this
//! order:
//!
//! 1. Stuck bumper
//! 2. Lift, bumper, sonar, GPS ground speed, GPS progress, yaw mismatch (while moving)
//! 3. Rotation stall (while rotating on the spot)
//! 4. Odometry error, motor overload, motor fault
//!
//! The detector never stops the mower itself. It marks the obstacle on the map, bumps the
//! matching counter and leaves the response to the active operation.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod bumper;
mod params;

pub use bumper::{BumperDebouncer, BumperSide};
pub use params::DetectParams;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::f64::consts::PI;

use log::warn;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use comms_if::{
    eqpt::{
        drive::DriveStatus,
        sensors::{BumperInput, SonarInput},
    },
    tm::AnomalyCounters,
};

use super::{
    loc::{Pose, SpeedState},
    path::{PathGenerator, WayMode},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    params: DetectParams,
    counters: AnomalyCounters,

    left: BumperDebouncer,
    right: BumperDebouncer,
    bumper_stuck_reported: bool,
    last_bumper_s: Option<f64>,

    last_eval_s: Option<f64>,

    /// Start of the current linear motion
    linear_start_s: f64,

    /// Start of the current rotation on the spot
    angular_start_s: f64,

    /// Last time any motion was commanded
    in_motion_last_s: f64,

    overall_motion_deadline_s: f64,
    next_gps_motion_check_s: f64,

    /// Position at the previous progress check, `None` after the mower stood still
    last_gps_motion_pos: Option<Vector2<f64>>,

    /// Accumulated time with too little ground speed
    no_gps_speed_s: f64,

    gps_checks_suppressed_until_s: f64,

    /// A rotation stall has been reported for the current rotation
    rotation_stall_latched: bool,
}

/// Everything the detector looks at in one cycle.
#[derive(Debug, Clone, Default)]
pub struct DetectorInput {
    pub pose: Pose,
    pub speed: SpeedState,

    /// Linear speed currently commanded to the drive
    pub linear_set_ms: f64,

    /// Angular speed currently commanded to the drive
    pub angular_set_rads: f64,

    pub bumper: BumperInput,
    pub sonar: SonarInput,
    pub lift: bool,
    pub drive: DriveStatus,
    pub imu_found: bool,

    /// The active operation is line tracking, only then are anomalies reported
    pub monitoring: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An anomaly found by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AnomalyEvent {
    Lift,
    Bumper(BumperSide),

    /// A bumper has been held closed for too long
    BumperStuck,

    Sonar,

    /// Ground speed stayed well below the commanded speed
    GpsNoSpeedMatch,

    /// Position made no progress over a check period
    GpsNoMotion,

    /// The mower is being deflected while tracking a line
    ImuYawMismatch,

    /// A rotation on the spot is not happening
    RotationTimeout {
        side: ObstacleSide,
        cause: RotationStall,
    },

    MotorOverload,
    MotorFault,
    OdometryError,
}

/// Which end of the mower is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleSide {
    Front,
    Back,
}

/// Why a rotation was judged to be stalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationStall {
    Timeout,
    Overload,

    /// The IMU shows no rotation
    NoYawRate,

    /// IMU and wheels disagree about the rotation
    YawMismatch,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectParams::default())
    }
}

impl AnomalyDetector {
    pub fn new(params: DetectParams) -> Self {
        Self {
            params,
            counters: AnomalyCounters::default(),
            left: BumperDebouncer::default(),
            right: BumperDebouncer::default(),
            bumper_stuck_reported: false,
            last_bumper_s: None,
            last_eval_s: None,
            linear_start_s: 0.0,
            angular_start_s: 0.0,
            in_motion_last_s: 0.0,
            overall_motion_deadline_s: 0.0,
            next_gps_motion_check_s: 0.0,
            last_gps_motion_pos: None,
            no_gps_speed_s: 0.0,
            gps_checks_suppressed_until_s: 0.0,
            rotation_stall_latched: false,
        }
    }

    /// Evaluate all checks for this cycle.
    ///
    /// Motion timers and bumper debouncers are updated every cycle, but events are only reported
    /// while `input.monitoring` is set. On a report the obstacle is marked on the path generator
    /// and the motion timers restart.
    pub fn evaluate(
        &mut self,
        input: &DetectorInput,
        now_s: f64,
        path: &mut dyn PathGenerator,
    ) -> Option<AnomalyEvent> {
        let dt_s = self.last_eval_s.map_or(0.0, |t| (now_s - t).max(0.0));
        self.last_eval_s = Some(now_s);

        let should_move = input.linear_set_ms.abs() >= self.params.motor_min_speed_ms;
        let should_rotate =
            !should_move && input.angular_set_rads.abs() > self.params.rotate_min_rads;

        self.update_timers(now_s, should_move, should_rotate);

        self.left
            .update(input.bumper.left, now_s, self.params.bumper_trigger_delay_s);
        self.right
            .update(input.bumper.right, now_s, self.params.bumper_trigger_delay_s);
        if !input.bumper.left && !input.bumper.right {
            self.bumper_stuck_reported = false;
        }

        if !input.monitoring {
            return None;
        }

        let mut event = self.check_bumper_stuck(now_s);

        if event.is_none() && should_move {
            event = self.check_linear(input, now_s, dt_s, &*path);
        }
        if event.is_none() && should_rotate {
            event = self.check_rotation(input, now_s);
        }
        if event.is_none() {
            event = self.check_hardware(&input.drive);
        }

        if let Some(ev) = event {
            self.on_report(&ev, &input.pose, now_s, path);
        }

        event
    }

    /// Restart all short term motion timers.
    pub fn reset_motion(&mut self, now_s: f64) {
        self.linear_start_s = now_s;
        self.angular_start_s = now_s;
        self.overall_motion_deadline_s = now_s + self.params.overall_motion_timeout_s;
        self.next_gps_motion_check_s = now_s + self.params.gps_motion_timeout_s;
        self.no_gps_speed_s = 0.0;
    }

    /// Ignore the GPS speed and progress checks until the given time.
    pub fn suppress_gps_checks_until(&mut self, time_s: f64) {
        self.gps_checks_suppressed_until_s = time_s;
    }

    pub fn counters(&self) -> AnomalyCounters {
        self.counters
    }

    /// Restore the counters, e.g. from persisted state.
    pub fn set_counters(&mut self, counters: AnomalyCounters) {
        self.counters = counters;
    }

    pub fn params(&self) -> &DetectParams {
        &self.params
    }

    fn update_timers(&mut self, now_s: f64, should_move: bool, should_rotate: bool) {
        if !should_move {
            self.linear_start_s = now_s;
            self.next_gps_motion_check_s = now_s + self.params.gps_motion_timeout_s;
            self.no_gps_speed_s = 0.0;
        }

        if !should_rotate {
            self.angular_start_s = now_s;
            self.rotation_stall_latched = false;
        }

        // Short pauses between linear and angular motion still count as being in motion
        if should_move || should_rotate {
            self.in_motion_last_s = now_s;
        }
        if now_s > self.in_motion_last_s + self.params.in_motion_hold_s {
            self.overall_motion_deadline_s = now_s + self.params.overall_motion_timeout_s;
            self.last_gps_motion_pos = None;
        }
    }

    fn check_bumper_stuck(&mut self, now_s: f64) -> Option<AnomalyEvent> {
        let held_s = self.left.held_s(now_s).max(self.right.held_s(now_s));

        if !self.bumper_stuck_reported && held_s > self.params.bumper_max_trigger_time_s {
            self.bumper_stuck_reported = true;
            return Some(AnomalyEvent::BumperStuck);
        }

        None
    }

    fn check_linear(
        &mut self,
        input: &DetectorInput,
        now_s: f64,
        dt_s: f64,
        path: &dyn PathGenerator,
    ) -> Option<AnomalyEvent> {
        let p = &self.params;
        let past_deadtime = now_s > self.linear_start_s + p.bumper_deadtime_s;

        // ---- LIFT ----
        if p.lift_obstacle_avoidance && input.lift && past_deadtime {
            return Some(AnomalyEvent::Lift);
        }

        // ---- BUMPER ----
        let bumper_ready = self
            .last_bumper_s
            .map_or(true, |t| now_s > t + p.bumper_deadtime_s);
        if bumper_ready && (self.left.triggered() || self.right.triggered()) {
            self.last_bumper_s = Some(now_s);
            let side = if self.left.triggered() {
                BumperSide::Left
            } else {
                BumperSide::Right
            };
            return Some(AnomalyEvent::Bumper(side));
        }

        // ---- SONAR ----
        if p.sonar_enabled && path.way_mode() != WayMode::Dock {
            if let Some(d) = input.sonar.nearest_m() {
                if d < p.sonar_trigger_dist_m {
                    return Some(AnomalyEvent::Sonar);
                }
            }
        }

        let gps_suppressed = now_s < self.gps_checks_suppressed_until_s;

        // ---- GPS GROUND SPEED ----
        if now_s > self.linear_start_s + p.gps_speed_deadtime_s {
            if input.speed.ground_speed_ms < input.linear_set_ms.abs() * p.gps_speed_fraction {
                self.no_gps_speed_s += dt_s;

                if p.gps_speed_detection
                    && !gps_suppressed
                    && !path.is_at_dock_path()
                    && self.no_gps_speed_s > p.gps_speed_delay_s
                {
                    self.no_gps_speed_s = 0.0;
                    return Some(AnomalyEvent::GpsNoSpeedMatch);
                }
            } else {
                self.no_gps_speed_s = 0.0;
            }
        }

        // ---- GPS PROGRESS ----
        if now_s > self.next_gps_motion_check_s || now_s > self.overall_motion_deadline_s {
            self.next_gps_motion_check_s = now_s + p.gps_motion_timeout_s;
            self.overall_motion_deadline_s = now_s + p.overall_motion_timeout_s;

            let last_pos = self.last_gps_motion_pos.replace(input.pose.position_m);
            if let Some(last_pos) = last_pos {
                let progress_m = (input.pose.position_m - last_pos).norm();
                if p.gps_motion_detection && !gps_suppressed && progress_m < p.gps_motion_delta_m {
                    return Some(AnomalyEvent::GpsNoMotion);
                }
            }
        }

        // ---- YAW MISMATCH ----
        if input.imu_found
            && past_deadtime
            && path.distance_to_target(&input.pose) > p.yaw_mismatch_waypoint_dist_m
            && path.distance_to_last_target(&input.pose) > p.yaw_mismatch_waypoint_dist_m
        {
            let s = &input.speed;
            let diff_exceeded = s.yaw_diff_lp_rads.abs() > p.yaw_mismatch_rads;
            let imu_only = s.yaw_rate_imu_rads.abs() > p.yaw_mismatch_rads
                && s.yaw_rate_wheels_rads.abs() < s.yaw_rate_imu_rads.abs() / 3.0;

            if diff_exceeded || imu_only {
                return Some(AnomalyEvent::ImuYawMismatch);
            }
        }

        None
    }

    fn check_rotation(&mut self, input: &DetectorInput, now_s: f64) -> Option<AnomalyEvent> {
        let p = &self.params;
        if !p.rotation_detection || self.rotation_stall_latched {
            return None;
        }

        let elapsed_s = now_s - self.angular_start_s;
        let side = if p.freewheel_at_back {
            ObstacleSide::Back
        } else {
            ObstacleSide::Front
        };

        let stall = if elapsed_s > p.rotation_timeout_s {
            Some((side, RotationStall::Timeout))
        } else if p.overload_rotation
            && input.drive.overload
            && elapsed_s > p.overload_rotation_deadtime_s
        {
            Some((side, RotationStall::Overload))
        } else if input.imu_found && elapsed_s > p.rotation_grace_s {
            if input.speed.yaw_rate_lp_rads.abs() < p.rotation_min_yaw_rate_rads {
                Some((ObstacleSide::Back, RotationStall::NoYawRate))
            } else if input.speed.yaw_diff_lp_rads > p.rotation_yaw_diff_rads {
                Some((ObstacleSide::Back, RotationStall::YawMismatch))
            } else {
                None
            }
        } else {
            None
        };

        stall.map(|(side, cause)| {
            self.rotation_stall_latched = true;
            AnomalyEvent::RotationTimeout { side, cause }
        })
    }

    fn check_hardware(&self, drive: &DriveStatus) -> Option<AnomalyEvent> {
        let p = &self.params;

        if p.odometry_error_detection && drive.odometry_error {
            Some(AnomalyEvent::OdometryError)
        } else if p.overload_detection && drive.overload_duration_s > p.overload_max_duration_s {
            Some(AnomalyEvent::MotorOverload)
        } else if p.fault_detection && drive.motor_fault {
            Some(AnomalyEvent::MotorFault)
        } else {
            None
        }
    }

    fn on_report(
        &mut self,
        event: &AnomalyEvent,
        pose: &Pose,
        now_s: f64,
        path: &mut dyn PathGenerator,
    ) {
        warn!("Anomaly detected: {}", event);

        let front = self.params.mower_radius_front_m;
        let back = self.params.mower_radius_back_m;
        let diameter = self.params.obstacle_diameter_m;
        let c = &mut self.counters;

        let mark = match *event {
            AnomalyEvent::Lift => {
                c.lift += 1;
                Some((0.0, front))
            }
            AnomalyEvent::Bumper(side) => {
                c.bumper += 1;
                Some((side.angle_offset_rad(self.params.bumper_angle_rad), front))
            }
            AnomalyEvent::Sonar => {
                c.sonar += 1;
                Some((0.0, front))
            }
            AnomalyEvent::GpsNoSpeedMatch => {
                c.gps_no_speed += 1;
                Some((0.0, front))
            }
            AnomalyEvent::GpsNoMotion => {
                c.gps_motion_timeout += 1;
                Some((0.0, front))
            }
            AnomalyEvent::ImuYawMismatch => {
                c.yaw_mismatch += 1;
                Some((0.0, front))
            }
            AnomalyEvent::RotationTimeout { side, cause } => {
                match cause {
                    RotationStall::Timeout | RotationStall::Overload => c.rotation_timeout += 1,
                    RotationStall::NoYawRate => c.imu_no_rotation_speed += 1,
                    RotationStall::YawMismatch => c.yaw_mismatch += 1,
                }
                match side {
                    ObstacleSide::Front => Some((0.0, front)),
                    ObstacleSide::Back => Some((PI, back)),
                }
            }
            AnomalyEvent::BumperStuck
            | AnomalyEvent::MotorOverload
            | AnomalyEvent::MotorFault
            | AnomalyEvent::OdometryError => None,
        };

        if let Some((angle_offset_rad, radius_m)) = mark {
            self.counters.obstacles += 1;
            path.mark_obstacle(pose, angle_offset_rad, radius_m, diameter);
            self.reset_motion(now_s);
        }
    }
}

impl std::fmt::Display for AnomalyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyEvent::Lift => write!(f, "lift"),
            AnomalyEvent::Bumper(side) => write!(f, "{} bumper", side),
            AnomalyEvent::BumperStuck => write!(f, "bumper stuck"),
            AnomalyEvent::Sonar => write!(f, "sonar"),
            AnomalyEvent::GpsNoSpeedMatch => write!(f, "no GPS ground speed"),
            AnomalyEvent::GpsNoMotion => write!(f, "no GPS motion"),
            AnomalyEvent::ImuYawMismatch => write!(f, "IMU/wheel yaw mismatch"),
            AnomalyEvent::RotationTimeout { side, cause } => {
                write!(f, "rotation stall ({:?}, obstacle at {:?})", cause, side)
            }
            AnomalyEvent::MotorOverload => write!(f, "motor overload"),
            AnomalyEvent::MotorFault => write!(f, "motor fault"),
            AnomalyEvent::OdometryError => write!(f, "odometry error"),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
