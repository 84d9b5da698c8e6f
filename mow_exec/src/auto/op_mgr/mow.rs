//! # Mow operation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::Deserialize;

use super::{ErrorCause, ObstacleCause, OpAction, OpCtx, OpEntry, OpKind, Operation};
use crate::auto::detect::ObstacleSide;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Follow the mow route with the mow motor on.
///
/// Possible transitions:
/// - EscapeReverse, EscapeForward, EscapeRotation, EscapeLawn on obstacles and stalls (returning)
/// - KidnapWait, GpsWaitFix, GpsWaitFloat, DockGpsReboot, Wait on position problems (returning)
/// - Dock when the route is finished, the battery is low or a motor is overloaded
/// - Idle on battery under-voltage
/// - Error on hardware faults, repeated motor faults or repeated route failures
pub struct Mow {
    route_failures: u32,
    motor_fault_retries: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MowParams {
    /// Failed route plans in a row before giving up
    pub max_route_failures: u32,

    /// Motor faults recovered by an escape before giving up
    pub max_motor_fault_retries: u32,

    /// Standstill after a GPS jump before the route is re-planned
    pub gps_jump_wait_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MowParams {
    fn default() -> Self {
        Self {
            max_route_failures: 3,
            max_motor_fault_retries: 3,
            gps_jump_wait_s: 2.0,
        }
    }
}

impl Mow {
    pub fn new() -> Self {
        Self {
            route_failures: 0,
            motor_fault_retries: 0,
        }
    }
}

impl Operation for Mow {
    fn kind(&self) -> OpKind {
        OpKind::Mow
    }

    fn begin(&mut self, cx: &mut OpCtx, entry: OpEntry) -> OpAction {
        if entry == OpEntry::Fresh {
            self.route_failures = 0;
            self.motor_fault_retries = 0;
        }

        cx.ctx.tracker.reset();
        let now_s = cx.now_s();
        cx.ctx.detector.reset_motion(now_s);

        // Re-plan from the current position, the path generator keeps the mow progress
        let pose = cx.pose();
        if cx.ctx.path.start_mowing(&pose) {
            self.route_failures = 0;
            return OpAction::None;
        }

        self.route_failures += 1;
        warn!(
            "Mow route planning failed ({}/{})",
            self.route_failures, cx.params.mow.max_route_failures
        );
        if self.route_failures >= cx.params.mow.max_route_failures {
            cx.escalate(ErrorCause::RouteFailed)
        } else {
            cx.ctx.last_obstacle = None;
            OpAction::call(OpKind::EscapeReverse, "route planning failed")
        }
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        cx.track_line();
        OpAction::None
    }

    fn end(&mut self, cx: &mut OpCtx) {
        cx.stop_motors();
    }

    fn on_obstacle(&mut self, cx: &mut OpCtx, cause: ObstacleCause) -> OpAction {
        cx.ctx.last_obstacle = Some(cause);

        // Reverse tracked segments back away forwards
        if cx.ctx.path.track_reverse() {
            OpAction::call(OpKind::EscapeForward, format!("obstacle: {}", cause))
        } else {
            OpAction::call(OpKind::EscapeReverse, format!("obstacle: {}", cause))
        }
    }

    fn on_obstacle_rotation(&mut self, cx: &mut OpCtx, side: ObstacleSide) -> OpAction {
        cx.ctx.last_obstacle = None;

        match side {
            ObstacleSide::Back => OpAction::call(OpKind::EscapeRotation, "rotation blocked at back"),
            ObstacleSide::Front => {
                OpAction::call(OpKind::EscapeReverse, "rotation blocked at front")
            }
        }
    }

    fn on_kidnapped(&mut self, _cx: &mut OpCtx, kidnapped: bool) -> OpAction {
        if kidnapped {
            OpAction::call(OpKind::KidnapWait, "kidnapped")
        } else {
            OpAction::None
        }
    }

    fn on_gps_jump(&mut self, cx: &mut OpCtx) -> OpAction {
        cx.ctx.wait_s = cx.params.mow.gps_jump_wait_s;
        OpAction::call(OpKind::Wait, "GPS jump")
    }

    fn on_gps_no_signal(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::call(OpKind::GpsWaitFloat, "no GPS signal")
    }

    fn on_gps_fix_timeout(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::call(OpKind::GpsWaitFix, "GPS fix timeout")
    }

    fn on_dock_gps_reboot(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::call(OpKind::DockGpsReboot, "GPS reboot point")
    }

    fn on_odometry_error(&mut self, cx: &mut OpCtx) -> OpAction {
        cx.escalate(ErrorCause::OdometryError)
    }

    fn on_motor_overload(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::change(OpKind::Dock, "motor overload")
    }

    fn on_motor_error(&mut self, cx: &mut OpCtx) -> OpAction {
        self.motor_fault_retries += 1;
        if self.motor_fault_retries > cx.params.mow.max_motor_fault_retries {
            return cx.escalate(ErrorCause::MotorFault);
        }

        info!(
            "Motor fault, recovery attempt {}/{}",
            self.motor_fault_retries, cx.params.mow.max_motor_fault_retries
        );
        cx.ctx.last_obstacle = None;
        OpAction::call(OpKind::EscapeReverse, "motor fault")
    }

    fn on_motor_mow_stall(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::call(OpKind::EscapeLawn, "mow motor stall")
    }

    fn on_battery_undervoltage(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::change(OpKind::Idle, "battery under-voltage")
    }

    fn on_battery_low_should_dock(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::change(OpKind::Dock, "battery low")
    }

    fn on_no_further_waypoints(&mut self, cx: &mut OpCtx) -> OpAction {
        if cx.ctx.path.dock_position().is_some() {
            OpAction::change(OpKind::Dock, "mowing finished")
        } else {
            OpAction::change(OpKind::Idle, "mowing finished")
        }
    }

    fn on_imu_tilt(&mut self, cx: &mut OpCtx) -> OpAction {
        cx.escalate(ErrorCause::ImuTilt)
    }

    fn on_imu_error(&mut self, cx: &mut OpCtx) -> OpAction {
        cx.escalate(ErrorCause::ImuError)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::{test_utils::Harness, OpType, RobotEvent};
    use super::*;
    use crate::auto::{
        detect::{AnomalyEvent, BumperSide},
        line_tracker::TrackEvent,
        path::WaypointPath,
    };

    fn mowing() -> Harness {
        let mut h = Harness::new();
        h.set(OpType::Mow);
        assert_eq!(h.active(), OpKind::Mow);
        h
    }

    #[test]
    fn test_tracks_with_mow_motor() {
        let mut h = mowing();
        h.run_for(1.0, 0.02);

        assert!(h.drive.linear_ms > 0.0);
        assert_eq!(h.active(), OpKind::Mow);
    }

    #[test]
    fn test_obstacle_calls_escape() {
        let mut h = mowing();
        h.event(RobotEvent::Anomaly(AnomalyEvent::Bumper(BumperSide::Right)));

        assert_eq!(h.active(), OpKind::EscapeReverse);
        assert_eq!(h.mgr.chain_string(), "EscapeReverse->Mow");
        assert_eq!(
            h.ctx.last_obstacle,
            Some(ObstacleCause::Bumper(BumperSide::Right))
        );
    }

    #[test]
    fn test_rotation_obstacle() {
        let mut h = mowing();
        h.event(RobotEvent::Anomaly(AnomalyEvent::RotationTimeout {
            side: ObstacleSide::Back,
            cause: crate::auto::detect::RotationStall::Timeout,
        }));
        assert_eq!(h.active(), OpKind::EscapeRotation);
    }

    #[test]
    fn test_gps_jump_waits_then_resumes() {
        let mut h = mowing();
        h.event(RobotEvent::GpsJump);
        assert_eq!(h.active(), OpKind::Wait);
        assert_eq!(h.drive.linear_ms, 0.0);

        h.run_for(2.5, 0.1);
        assert_eq!(h.active(), OpKind::Mow);
    }

    #[test]
    fn test_position_problems() {
        let mut h = mowing();
        h.event(RobotEvent::Track(TrackEvent::GpsFixTimeout));
        assert_eq!(h.mgr.chain_string(), "GpsWaitFix->Mow");

        let mut h = mowing();
        h.event(RobotEvent::GpsNoSignal);
        assert_eq!(h.mgr.chain_string(), "GpsWaitFloat->Mow");

        let mut h = mowing();
        h.event(RobotEvent::Track(TrackEvent::Kidnapped(true)));
        assert_eq!(h.mgr.chain_string(), "KidnapWait->Mow");
    }

    #[test]
    fn test_finished_goes_to_dock() {
        let mut h = mowing();
        h.event(RobotEvent::Track(TrackEvent::NoFurtherWaypoints));
        assert_eq!(h.active(), OpKind::Dock);
        assert!(!h.mgr.base(OpKind::Dock).initiated_by_operator);

        let mut h = mowing();
        h.ctx.path = Box::new(WaypointPath::new(
            vec![nalgebra::Vector2::new(5.0, 0.0)],
            Vec::new(),
        ));
        h.event(RobotEvent::Track(TrackEvent::NoFurtherWaypoints));
        assert_eq!(h.active(), OpKind::Idle);
    }

    #[test]
    fn test_battery() {
        let mut h = mowing();
        h.event(RobotEvent::BatteryLowShouldDock);
        assert_eq!(h.active(), OpKind::Dock);

        let mut h = mowing();
        h.event(RobotEvent::BatteryUndervoltage);
        assert_eq!(h.active(), OpKind::Idle);
    }

    #[test]
    fn test_motor_fault_retries() {
        let mut h = mowing();

        for _ in 0..3 {
            h.event(RobotEvent::Anomaly(AnomalyEvent::MotorFault));
            assert_eq!(h.active(), OpKind::EscapeReverse);
            h.run_for(6.0, 0.1);
            assert_eq!(h.active(), OpKind::Mow);
        }

        h.event(RobotEvent::Anomaly(AnomalyEvent::MotorFault));
        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::MotorFault));
    }

    #[test]
    fn test_route_failures() {
        let mut h = Harness::new();
        h.ctx.path = Box::new(WaypointPath::new(Vec::new(), Vec::new()));
        h.set(OpType::Mow);
        assert_eq!(h.active(), OpKind::EscapeReverse);

        h.run_for(20.0, 0.1);
        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::RouteFailed));
    }

    #[test]
    fn test_hardware_faults() {
        let mut h = mowing();
        h.event(RobotEvent::ImuTilt);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::ImuTilt));

        let mut h = mowing();
        h.event(RobotEvent::Anomaly(AnomalyEvent::OdometryError));
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::OdometryError));

        let mut h = mowing();
        h.event(RobotEvent::Anomaly(AnomalyEvent::MotorOverload));
        assert_eq!(h.active(), OpKind::Dock);

        let mut h = mowing();
        h.event(RobotEvent::MowStall);
        assert_eq!(h.active(), OpKind::EscapeLawn);
    }
}
