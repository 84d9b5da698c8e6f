//! # Operation Manager module
//!
//! This module implements the [`OpMgr`] state machine, which sequences the behaviour of the mower.
//! Exactly one operation is active at any time:
//!
//! - `Idle` - Motors off, waiting for an operator command or the charger.
//! - `ImuCalibration` - Standing still until the IMU yaw settles, before mowing or docking.
//! - `Mow` - Following the mow route with the line tracker.
//! - `EscapeReverse`, `EscapeForward`, `EscapeRotation`, `EscapeLawn` - Short open loop
//!   manoeuvres away from an obstacle, stall or patch of high grass.
//! - `Dock` - Following the dock route to the charging contact.
//! - `Charge` - On the charger, re-touching the contact if it is lost.
//! - `KidnapWait` - The mower is far off its path, waiting for the position to recover.
//! - `GpsWaitFix`, `GpsWaitFloat` - Waiting for the GPS solution to come back.
//! - `DockGpsReboot`, `GpsRebootRecovery` - Rebooting the GPS receiver and waiting for it.
//! - `Wait` - Standing still for a fixed time.
//! - `Error` - Latched until acknowledged by the operator.
//!
//! Operations don't hold pointers to each other. An operation asks for a change by returning an
//! [`OpAction`]. A change with `return_on_exit` pushes the current operation onto the pending goal
//! chain, and [`OpAction::Resume`] pops it again, so sequences such as
//! `ImuCalibration->GpsWaitFix->Mow` are expressed without any operation knowing the full chain.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod charge;
mod dock;
mod error;
mod escape;
mod gps_reboot;
mod gps_wait;
mod idle;
mod imu_calibration;
mod kidnap_wait;
mod mgr;
mod mow;
mod params;
mod retry;
mod wait;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt::Display;

use log::error;
use serde::{Deserialize, Serialize};

use crate::{context::RobotContext, drive::Drive};

use super::{
    detect::{AnomalyEvent, BumperSide, ObstacleSide},
    line_tracker::{TrackEvent, TrackPolicy},
    loc::Pose,
};

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use mgr::OpMgr;
pub use params::OpMgrParams;
pub use retry::RetryWindow;

pub mod states {
    pub use super::charge::Charge;
    pub use super::dock::Dock;
    pub use super::error::Error;
    pub use super::escape::{Escape, EscapeKind};
    pub use super::gps_reboot::{DockGpsReboot, GpsRebootRecovery};
    pub use super::gps_wait::{GpsWaitFix, GpsWaitFloat};
    pub use super::idle::Idle;
    pub use super::imu_calibration::ImuCalibration;
    pub use super::kidnap_wait::KidnapWait;
    pub use super::mow::Mow;
    pub use super::wait::Wait;
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A named state of the mower.
///
/// Every handler defaults to doing nothing, operations override the events they care about.
pub trait Operation {
    fn kind(&self) -> OpKind;

    /// Called when the operation becomes active, either freshly or when resumed from the chain.
    fn begin(&mut self, _cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        OpAction::None
    }

    /// Called once per cycle while active.
    fn run(&mut self, cx: &mut OpCtx) -> OpAction;

    /// Called when another operation takes over.
    fn end(&mut self, _cx: &mut OpCtx) {}

    /// Turn an operator stop request into a change to Idle.
    fn check_stop(&mut self, cx: &mut OpCtx) -> OpAction {
        if cx.base.should_stop {
            OpAction::change(OpKind::Idle, "stop requested")
        } else {
            OpAction::None
        }
    }

    fn on_obstacle(&mut self, _cx: &mut OpCtx, _cause: ObstacleCause) -> OpAction {
        OpAction::None
    }

    fn on_obstacle_rotation(&mut self, _cx: &mut OpCtx, _side: ObstacleSide) -> OpAction {
        OpAction::None
    }

    fn on_kidnapped(&mut self, _cx: &mut OpCtx, _kidnapped: bool) -> OpAction {
        OpAction::None
    }

    fn on_gps_jump(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_gps_no_signal(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_gps_fix_timeout(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_dock_gps_reboot(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_odometry_error(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_motor_overload(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_motor_error(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_motor_mow_stall(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_battery_undervoltage(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_battery_low_should_dock(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_target_reached(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_no_further_waypoints(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_charger_connected(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_charger_disconnected(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_bad_charging_contact(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_charging_completed(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_imu_tilt(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }

    fn on_imu_error(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::None
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything an operation may touch while handling a call.
pub struct OpCtx<'a> {
    pub ctx: &'a mut RobotContext,
    pub drive: &'a mut dyn Drive,
    pub params: &'a OpMgrParams,

    /// Lifecycle data of the operation being called
    pub base: &'a mut OpBase,
}

/// Lifecycle data the manager keeps for every operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpBase {
    /// The operation was started by an operator command rather than automatically
    pub initiated_by_operator: bool,

    /// The operator asked the operation to stop
    pub should_stop: bool,

    /// Time of the last `begin`
    pub start_time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors that can occur in the operation manager.
#[derive(Debug, thiserror::Error)]
pub enum OpMgrError {
    #[error("Failed to load OpMgrParams: {0}")]
    ParamLoadError(util::params::LoadError),
}

/// All operations of the mower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Idle,
    ImuCalibration,
    Mow,
    EscapeReverse,
    EscapeForward,
    EscapeRotation,
    EscapeLawn,
    Dock,
    Charge,
    KidnapWait,
    GpsWaitFix,
    GpsWaitFloat,
    DockGpsReboot,
    GpsRebootRecovery,
    Wait,
    Error,
}

/// Operations an operator can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    Idle,
    Mow,
    Dock,
    Charge,
    Error,
}

/// How an operation became active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpEntry {
    /// Started by a change
    Fresh,

    /// Returned to from the pending goal chain
    Resumed,
}

/// Action requested by an operation handler, applied by the manager in the same cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum OpAction {
    None,

    /// Change to another operation, pushing the current one onto the chain if `return_on_exit`.
    Change {
        to: OpKind,
        return_on_exit: bool,
        reason: String,
    },

    /// Return to the next pending goal, or Idle if there is none.
    Resume { reason: String },
}

/// Why an obstacle was reported to the active operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleCause {
    Lift,
    Bumper(BumperSide),
    Sonar,
    GpsNoSpeed,
    GpsNoMotion,
    YawMismatch,

    /// The straight approach to the charging contact timed out
    DockApproachTimeout,
}

/// Reason the mower ended up in Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCause {
    BumperStuck,
    Lift,
    EscapesExhausted,
    MotorFault,
    OdometryError,
    ImuTilt,
    ImuError,
    RouteFailed,
    DockFailed,
    KidnapRecoveryFailed,
    GpsFixTimeout,
    GpsNoSignal,
    GpsRebootFailed,
    ChargeContactFailed,
}

/// Events raised by the robot each cycle and dispatched to the active operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RobotEvent {
    Anomaly(AnomalyEvent),
    Track(TrackEvent),
    GpsJump,
    GpsNoSignal,
    ImuTilt,
    ImuError,
    MowStall,
    ChargerConnected,
    ChargerDisconnected,
    BadChargingContact,
    BatteryUndervoltage,
    BatteryLowShouldDock,
    ChargingCompleted,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl OpCtx<'_> {
    pub fn now_s(&self) -> f64 {
        self.ctx.now_s
    }

    pub fn pose(&self) -> Pose {
        self.ctx.estimator.pose()
    }

    /// Seconds since this operation began.
    pub fn elapsed_s(&self) -> f64 {
        self.ctx.now_s - self.base.start_time_s
    }

    /// Stop traction and mow motors.
    pub fn stop_motors(&mut self) {
        self.drive.set_linear_angular_speed(0.0, 0.0, false);
        self.drive.set_mow_state(false);
    }

    /// Run the line tracker against the path and command its output to the drive.
    ///
    /// Navigation events are queued on the context and dispatched by the manager after `run`.
    pub fn track_line(&mut self) {
        let ctx = &mut *self.ctx;

        let sonar_near_m = ctx.tracker.params().sonar_near_dist_m;
        let policy = TrackPolicy {
            cruise_speed_ms: ctx.cruise_speed_ms,
            gps_solution: ctx.estimator.gps_solution(),
            last_fix_time_s: ctx.estimator.last_fix_time_s(),
            sonar_near: ctx.frame.sonar.nearest_m().map_or(false, |d| d < sonar_near_m),
            drive: self.drive.status(),
            linear_set_ms: self.drive.linear_set_ms(),
            angular_set_rads: self.drive.angular_set_rads(),
            lift: ctx.frame.lift,
            docking_goal: ctx.goal == OpKind::Dock,
        };

        let pose = ctx.estimator.pose();
        let out = ctx
            .tracker
            .track(&pose, &policy, ctx.now_s, ctx.path.as_mut());

        if out.reset_filters {
            ctx.estimator.reset_motion_filters();
        }

        self.drive
            .set_linear_angular_speed(out.linear_ms, out.angular_rads, true);
        self.drive.set_mow_state(out.mow_enable);

        ctx.track_events.extend(out.events);
    }

    /// Record the cause and go to Error.
    pub fn escalate(&mut self, cause: ErrorCause) -> OpAction {
        error!("Escalating to Error: {}", cause);
        self.ctx.error_cause = Some(cause);
        OpAction::change(OpKind::Error, cause.to_string())
    }
}

impl OpAction {
    /// Change to `to`, replacing the current operation.
    pub fn change<S: Into<String>>(to: OpKind, reason: S) -> Self {
        OpAction::Change {
            to,
            return_on_exit: false,
            reason: reason.into(),
        }
    }

    /// Change to `to`, returning to the current operation when it exits.
    pub fn call<S: Into<String>>(to: OpKind, reason: S) -> Self {
        OpAction::Change {
            to,
            return_on_exit: true,
            reason: reason.into(),
        }
    }

    pub fn resume<S: Into<String>>(reason: S) -> Self {
        OpAction::Resume {
            reason: reason.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, OpAction::None)
    }
}

impl OpKind {
    /// All operations, in registry order.
    pub const ALL: [OpKind; 16] = [
        OpKind::Idle,
        OpKind::ImuCalibration,
        OpKind::Mow,
        OpKind::EscapeReverse,
        OpKind::EscapeForward,
        OpKind::EscapeRotation,
        OpKind::EscapeLawn,
        OpKind::Dock,
        OpKind::Charge,
        OpKind::KidnapWait,
        OpKind::GpsWaitFix,
        OpKind::GpsWaitFloat,
        OpKind::DockGpsReboot,
        OpKind::GpsRebootRecovery,
        OpKind::Wait,
        OpKind::Error,
    ];

    /// Position in [`OpKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Goal operations clear the pending chain when changed to.
    pub fn is_goal(self) -> bool {
        self.op_type().is_some()
    }

    pub fn op_type(self) -> Option<OpType> {
        match self {
            OpKind::Idle => Some(OpType::Idle),
            OpKind::Mow => Some(OpType::Mow),
            OpKind::Dock => Some(OpType::Dock),
            OpKind::Charge => Some(OpType::Charge),
            OpKind::Error => Some(OpType::Error),
            _ => None,
        }
    }

    /// The anomaly detector reports events while this operation is active.
    pub fn monitors_anomalies(self) -> bool {
        matches!(self, OpKind::Mow | OpKind::Dock)
    }

    /// Operations run at the slower idle period.
    pub fn is_resting(self) -> bool {
        matches!(self, OpKind::Idle | OpKind::Charge | OpKind::Error)
    }
}

impl OpType {
    pub fn kind(self) -> OpKind {
        match self {
            OpType::Idle => OpKind::Idle,
            OpType::Mow => OpKind::Mow,
            OpType::Dock => OpKind::Dock,
            OpType::Charge => OpKind::Charge,
            OpType::Error => OpKind::Error,
        }
    }
}

impl ObstacleCause {
    /// The cause of an anomaly that is handled as an obstacle, `None` for other anomalies.
    pub fn from_anomaly(event: &AnomalyEvent) -> Option<Self> {
        match event {
            AnomalyEvent::Lift => Some(ObstacleCause::Lift),
            AnomalyEvent::Bumper(side) => Some(ObstacleCause::Bumper(*side)),
            AnomalyEvent::Sonar => Some(ObstacleCause::Sonar),
            AnomalyEvent::GpsNoSpeedMatch => Some(ObstacleCause::GpsNoSpeed),
            AnomalyEvent::GpsNoMotion => Some(ObstacleCause::GpsNoMotion),
            AnomalyEvent::ImuYawMismatch => Some(ObstacleCause::YawMismatch),
            _ => None,
        }
    }
}

impl Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Same names as the serialised form
        write!(f, "{:?}", self)
    }
}

impl Display for ObstacleCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObstacleCause::Lift => write!(f, "lift"),
            ObstacleCause::Bumper(side) => write!(f, "{} bumper", side),
            ObstacleCause::Sonar => write!(f, "sonar"),
            ObstacleCause::GpsNoSpeed => write!(f, "no GPS speed"),
            ObstacleCause::GpsNoMotion => write!(f, "no GPS motion"),
            ObstacleCause::YawMismatch => write!(f, "yaw mismatch"),
            ObstacleCause::DockApproachTimeout => write!(f, "dock approach timeout"),
        }
    }
}

impl Display for ErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCause::BumperStuck => "bumper stuck",
            ErrorCause::Lift => "lifted",
            ErrorCause::EscapesExhausted => "too many obstacles",
            ErrorCause::MotorFault => "motor fault",
            ErrorCause::OdometryError => "odometry error",
            ErrorCause::ImuTilt => "IMU tilt",
            ErrorCause::ImuError => "IMU error",
            ErrorCause::RouteFailed => "no route",
            ErrorCause::DockFailed => "docking failed",
            ErrorCause::KidnapRecoveryFailed => "kidnap recovery failed",
            ErrorCause::GpsFixTimeout => "no GPS fix",
            ErrorCause::GpsNoSignal => "no GPS signal",
            ErrorCause::GpsRebootFailed => "GPS reboot failed",
            ErrorCause::ChargeContactFailed => "no charger contact",
        };
        write!(f, "{}", s)
    }
}

// ------------------------------------------------------------------------------------------------
// TEST UTILITIES
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_utils {
    use nalgebra::Vector2;

    use super::*;
    use crate::{
        auto::path::{PathGenerator, WaypointPath},
        context::{RobotContext, RobotParams},
        drive::mock::RecordingDrive,
    };

    /// A context on a straight eastbound mow route from the origin, with a three point dock path
    /// to the west.
    pub fn context() -> RobotContext {
        let path = WaypointPath::new(
            vec![Vector2::new(5.0, 0.0), Vector2::new(10.0, 0.0)],
            vec![
                Vector2::new(-1.0, 0.0),
                Vector2::new(-2.0, 0.0),
                Vector2::new(-3.0, 0.0),
            ],
        );

        RobotContext::new(Box::new(path) as Box<dyn PathGenerator>, &RobotParams::default())
    }

    pub struct Harness {
        pub mgr: OpMgr,
        pub ctx: RobotContext,
        pub drive: RecordingDrive,
    }

    impl Harness {
        pub fn new() -> Self {
            let mut ctx = context();
            ctx.imu_calibration_pending = false;

            Self {
                mgr: OpMgr::new(OpMgrParams::default()),
                ctx,
                drive: RecordingDrive::default(),
            }
        }

        pub fn advance(&mut self, dt_s: f64) {
            self.ctx.now_s += dt_s;
        }

        pub fn event(&mut self, ev: RobotEvent) {
            self.mgr.handle_event(&mut self.ctx, &mut self.drive, &ev);
        }

        pub fn run(&mut self) {
            self.mgr.run(&mut self.ctx, &mut self.drive);
        }

        /// Run cycles of `dt_s` until `duration_s` has passed.
        pub fn run_for(&mut self, duration_s: f64, dt_s: f64) {
            let end_s = self.ctx.now_s + duration_s;
            while self.ctx.now_s < end_s {
                self.advance(dt_s);
                self.run();
            }
        }

        pub fn set(&mut self, op: OpType) {
            self.mgr
                .set_operation(&mut self.ctx, &mut self.drive, op, false);
        }

        pub fn change(&mut self, to: OpKind, return_on_exit: bool) {
            self.mgr.change_operation(
                &mut self.ctx,
                &mut self.drive,
                to,
                return_on_exit,
                "test",
            );
        }

        pub fn active(&self) -> OpKind {
            self.mgr.active()
        }
    }
}
