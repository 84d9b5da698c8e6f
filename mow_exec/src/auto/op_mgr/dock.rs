//! # Dock operation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::Deserialize;

use super::{ErrorCause, ObstacleCause, OpAction, OpCtx, OpEntry, OpKind, Operation};
use crate::auto::detect::ObstacleSide;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Follow the dock route to the charging contact.
///
/// Every failed approach backs off with an EscapeReverse and re-plans the route when resumed.
///
/// Possible transitions:
/// - Charge when the charger is connected
/// - EscapeReverse after a failed approach (returning)
/// - KidnapWait, GpsWaitFix, GpsWaitFloat, DockGpsReboot on position problems (returning)
/// - Idle on battery under-voltage
/// - Error after `max_retries` failed approaches or `max_route_failures` failed plans
pub struct Dock {
    retries: u32,
    route_failures: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DockParams {
    /// Failed approaches before giving up
    pub max_retries: u32,

    /// Failed route plans in a row before giving up
    pub max_route_failures: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for DockParams {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_route_failures: 3,
        }
    }
}

impl Dock {
    pub fn new() -> Self {
        Self {
            retries: 0,
            route_failures: 0,
        }
    }

    /// Count a failed approach, back off and try again, or give up.
    fn retry(&mut self, cx: &mut OpCtx, reason: String) -> OpAction {
        self.retries += 1;
        warn!(
            "Docking attempt failed: {} ({}/{})",
            reason, self.retries, cx.params.dock.max_retries
        );

        if self.retries >= cx.params.dock.max_retries {
            cx.escalate(ErrorCause::DockFailed)
        } else {
            OpAction::call(OpKind::EscapeReverse, reason)
        }
    }
}

impl Operation for Dock {
    fn kind(&self) -> OpKind {
        OpKind::Dock
    }

    fn begin(&mut self, cx: &mut OpCtx, entry: OpEntry) -> OpAction {
        if entry == OpEntry::Fresh {
            self.retries = 0;
            self.route_failures = 0;
        }

        // A dock requested by the operator parks the mower until the next command
        cx.ctx.parked_by_operator = cx.base.initiated_by_operator;

        cx.ctx.tracker.reset();
        let now_s = cx.now_s();
        cx.ctx.detector.reset_motion(now_s);

        let pose = cx.pose();
        if cx.ctx.path.start_docking(&pose) {
            self.route_failures = 0;
            return OpAction::None;
        }

        self.route_failures += 1;
        warn!(
            "Dock route planning failed ({}/{})",
            self.route_failures, cx.params.dock.max_route_failures
        );
        if self.route_failures >= cx.params.dock.max_route_failures {
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
        self.retry(cx, format!("obstacle: {}", cause))
    }

    fn on_obstacle_rotation(&mut self, cx: &mut OpCtx, side: ObstacleSide) -> OpAction {
        cx.ctx.last_obstacle = None;
        let reason = match side {
            ObstacleSide::Front => "rotation blocked at front",
            ObstacleSide::Back => "rotation blocked at back",
        };
        self.retry(cx, reason.to_string())
    }

    fn on_no_further_waypoints(&mut self, cx: &mut OpCtx) -> OpAction {
        if cx.ctx.frame.battery.charger_connected {
            OpAction::change(OpKind::Charge, "docked")
        } else {
            self.retry(cx, "no charger contact at end of dock path".to_string())
        }
    }

    fn on_charger_connected(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::change(OpKind::Charge, "docked")
    }

    fn on_kidnapped(&mut self, _cx: &mut OpCtx, kidnapped: bool) -> OpAction {
        if kidnapped {
            OpAction::call(OpKind::KidnapWait, "kidnapped")
        } else {
            OpAction::None
        }
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

    fn on_motor_error(&mut self, cx: &mut OpCtx) -> OpAction {
        cx.escalate(ErrorCause::MotorFault)
    }

    fn on_battery_undervoltage(&mut self, _cx: &mut OpCtx) -> OpAction {
        OpAction::change(OpKind::Idle, "battery under-voltage")
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
