//! # Operation manager

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};

use super::{
    states::*, ErrorCause, ObstacleCause, OpAction, OpBase, OpCtx, OpEntry, OpKind, OpMgrError,
    OpMgrParams, OpType, Operation, RetryWindow, RobotEvent,
};
use crate::{
    auto::{detect::AnomalyEvent, line_tracker::TrackEvent},
    context::RobotContext,
    drive::Drive,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Most changes applied in one call, a `begin` may immediately request another change.
const MAX_CHAINED_CHANGES: usize = 8;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Operation manager
///
/// Owns one instance of every operation for the lifetime of the program, the active operation and
/// the chain of pending goals.
pub struct OpMgr {
    params: OpMgrParams,

    /// Registry of all operations, indexed by [`OpKind::index`]
    ops: Vec<Slot>,

    active: OpKind,

    /// Pending goals, the last entry is resumed first.
    chain: Vec<OpKind>,

    /// Number of changes since creation
    transitions: u64,

    /// `begin` has not been called on the initial operation yet
    started: bool,

    /// The next fresh start of this operation comes from an operator command
    operator_request: Option<OpKind>,
}

struct Slot {
    base: OpBase,
    op: Box<dyn Operation>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl OpMgr {
    pub fn init(params_path: &str) -> Result<Self, OpMgrError> {
        let params: OpMgrParams =
            util::params::load(params_path).map_err(OpMgrError::ParamLoadError)?;

        Ok(Self::new(params))
    }

    /// Create the manager with Idle active.
    pub fn new(params: OpMgrParams) -> Self {
        let ops = OpKind::ALL
            .iter()
            .map(|k| Slot {
                base: OpBase::default(),
                op: new_op(*k),
            })
            .collect();

        Self {
            params,
            ops,
            active: OpKind::Idle,
            chain: Vec::new(),
            transitions: 0,
            started: false,
            operator_request: None,
        }
    }

    pub fn active(&self) -> OpKind {
        self.active
    }

    /// The outermost pending goal, or the active operation if nothing is pending.
    pub fn goal(&self) -> OpKind {
        self.chain.first().copied().unwrap_or(self.active)
    }

    /// The active operation followed by the pending goals, e.g. `ImuCalibration->GpsWaitFix->Mow`.
    pub fn chain_string(&self) -> String {
        std::iter::once(self.active)
            .chain(self.chain.iter().rev().copied())
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join("->")
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn params(&self) -> &OpMgrParams {
        &self.params
    }

    pub fn base(&self, kind: OpKind) -> OpBase {
        self.ops[kind.index()].base
    }

    /// Operator entry point.
    ///
    /// Refused while in Error. Mowing and docking go through ImuCalibration first if the IMU still
    /// needs calibrating.
    pub fn set_operation(
        &mut self,
        ctx: &mut RobotContext,
        drive: &mut dyn Drive,
        op: OpType,
        allow_repeat: bool,
    ) {
        self.ensure_started(ctx, drive);

        if self.active == OpKind::Error {
            warn!(
                "Operator requested {:?} but the error must be acknowledged first",
                op
            );
            return;
        }

        ctx.dock_fallbacks = 0;

        let target = op.kind();

        if self.goal() == target && !allow_repeat {
            debug!("{:?} is already the goal, ignored", op);
            return;
        }

        if ctx.imu_calibration_pending && matches!(op, OpType::Mow | OpType::Dock) {
            // Calibrate first, with the requested goal pending behind
            self.end_active(ctx, drive);
            self.chain.clear();
            self.chain.push(target);
            self.ops[target.index()].base.initiated_by_operator = true;
            let from = self.active;
            self.activate(ctx, OpKind::ImuCalibration, OpEntry::Fresh);
            self.log_change(from, "operator command, IMU calibration first");

            let action = self.call(ctx, drive, |op, cx| op.begin(cx, OpEntry::Fresh));
            self.apply(ctx, drive, action, 1);
            return;
        }

        self.operator_request = Some(target);
        self.change_inner(ctx, drive, target, false, "operator command", allow_repeat);
        self.operator_request = None;
    }

    /// Leave Error for Idle.
    pub fn acknowledge_error(&mut self, ctx: &mut RobotContext, drive: &mut dyn Drive) {
        if self.active != OpKind::Error {
            debug!("No error to acknowledge");
            return;
        }

        info!("Error acknowledged");
        ctx.error_cause = None;
        ctx.dock_fallbacks = 0;
        self.operator_request = Some(OpKind::Idle);
        self.change_operation(ctx, drive, OpKind::Idle, false, "error acknowledged");
        self.operator_request = None;
    }

    /// Ask the active operation to stop at the next cycle.
    pub fn request_stop(&mut self) {
        info!("Stop requested for {}", self.active);
        self.ops[self.active.index()].base.should_stop = true;
    }

    /// Change the active operation.
    ///
    /// The old operation's `end` and the new operation's `begin` are both called before this
    /// returns. Changing to the active operation is ignored.
    pub fn change_operation(
        &mut self,
        ctx: &mut RobotContext,
        drive: &mut dyn Drive,
        to: OpKind,
        return_on_exit: bool,
        reason: &str,
    ) {
        self.ensure_started(ctx, drive);
        self.change_inner(ctx, drive, to, return_on_exit, reason, false);
    }

    /// Dispatch a robot event to the active operation's handler.
    pub fn handle_event(&mut self, ctx: &mut RobotContext, drive: &mut dyn Drive, event: &RobotEvent) {
        self.ensure_started(ctx, drive);

        let action = match *event {
            RobotEvent::Anomaly(AnomalyEvent::BumperStuck) => {
                // Nothing to escape from, a stuck bumper needs a person
                self.call(ctx, drive, |_, cx| cx.escalate(ErrorCause::BumperStuck))
            }
            RobotEvent::Anomaly(AnomalyEvent::RotationTimeout { side, .. }) => {
                self.call(ctx, drive, |op, cx| op.on_obstacle_rotation(cx, side))
            }
            RobotEvent::Anomaly(AnomalyEvent::MotorOverload) => {
                self.call(ctx, drive, |op, cx| op.on_motor_overload(cx))
            }
            RobotEvent::Anomaly(AnomalyEvent::MotorFault) => {
                self.call(ctx, drive, |op, cx| op.on_motor_error(cx))
            }
            RobotEvent::Anomaly(AnomalyEvent::OdometryError) => {
                self.call(ctx, drive, |op, cx| op.on_odometry_error(cx))
            }
            RobotEvent::Anomaly(ref a) => match ObstacleCause::from_anomaly(a) {
                Some(cause) => self.call(ctx, drive, |op, cx| op.on_obstacle(cx, cause)),
                None => OpAction::None,
            },
            RobotEvent::Track(ev) => match ev {
                TrackEvent::TargetReached => {
                    self.call(ctx, drive, |op, cx| op.on_target_reached(cx))
                }
                TrackEvent::NoFurtherWaypoints => {
                    self.call(ctx, drive, |op, cx| op.on_no_further_waypoints(cx))
                }
                TrackEvent::GpsFixTimeout => {
                    self.call(ctx, drive, |op, cx| op.on_gps_fix_timeout(cx))
                }
                TrackEvent::Kidnapped(k) => self.call(ctx, drive, |op, cx| op.on_kidnapped(cx, k)),
                TrackEvent::DockGpsReboot => {
                    self.call(ctx, drive, |op, cx| op.on_dock_gps_reboot(cx))
                }
                TrackEvent::DockApproachTimeout => self.call(ctx, drive, |op, cx| {
                    op.on_obstacle(cx, ObstacleCause::DockApproachTimeout)
                }),
                // The tracker already moved on to the next dock point
                TrackEvent::UndockTimeout => OpAction::None,
            },
            RobotEvent::GpsJump => self.call(ctx, drive, |op, cx| op.on_gps_jump(cx)),
            RobotEvent::GpsNoSignal => self.call(ctx, drive, |op, cx| op.on_gps_no_signal(cx)),
            RobotEvent::ImuTilt => self.call(ctx, drive, |op, cx| op.on_imu_tilt(cx)),
            RobotEvent::ImuError => self.call(ctx, drive, |op, cx| op.on_imu_error(cx)),
            RobotEvent::MowStall => self.call(ctx, drive, |op, cx| op.on_motor_mow_stall(cx)),
            RobotEvent::ChargerConnected => {
                self.call(ctx, drive, |op, cx| op.on_charger_connected(cx))
            }
            RobotEvent::ChargerDisconnected => {
                self.call(ctx, drive, |op, cx| op.on_charger_disconnected(cx))
            }
            RobotEvent::BadChargingContact => {
                self.call(ctx, drive, |op, cx| op.on_bad_charging_contact(cx))
            }
            RobotEvent::BatteryUndervoltage => {
                self.call(ctx, drive, |op, cx| op.on_battery_undervoltage(cx))
            }
            RobotEvent::BatteryLowShouldDock => {
                self.call(ctx, drive, |op, cx| op.on_battery_low_should_dock(cx))
            }
            RobotEvent::ChargingCompleted => {
                self.call(ctx, drive, |op, cx| op.on_charging_completed(cx))
            }
        };

        self.apply(ctx, drive, action, 0);
    }

    /// Run one cycle of the active operation, then dispatch the navigation events it produced.
    pub fn run(&mut self, ctx: &mut RobotContext, drive: &mut dyn Drive) {
        self.ensure_started(ctx, drive);

        let action = self.call(ctx, drive, |op, cx| op.check_stop(cx));
        self.apply(ctx, drive, action, 0);

        let action = self.call(ctx, drive, |op, cx| op.run(cx));
        self.apply(ctx, drive, action, 0);

        let events: Vec<TrackEvent> = ctx.track_events.drain(..).collect();
        for ev in events {
            self.handle_event(ctx, drive, &RobotEvent::Track(ev));
        }
    }

    /// Configure the shared escape limiter and call `begin` on the initial operation.
    fn ensure_started(&mut self, ctx: &mut RobotContext, drive: &mut dyn Drive) {
        if self.started {
            return;
        }
        self.started = true;

        info!("OpMgr starting in {}", self.active);
        ctx.escape_window = RetryWindow::new(
            self.params.escape.window_s,
            self.params.escape.max_in_window,
        );
        self.activate(ctx, self.active, OpEntry::Fresh);
        let action = self.call(ctx, drive, |op, cx| op.begin(cx, OpEntry::Fresh));
        self.apply(ctx, drive, action, 0);
    }

    fn change_inner(
        &mut self,
        ctx: &mut RobotContext,
        drive: &mut dyn Drive,
        to: OpKind,
        return_on_exit: bool,
        reason: &str,
        allow_repeat: bool,
    ) {
        let was_active = self.active == to;

        self.apply(
            ctx,
            drive,
            OpAction::Change {
                to,
                return_on_exit,
                reason: reason.to_string(),
            },
            0,
        );

        // A repeated change to the active goal restarts it
        if allow_repeat && was_active && to.is_goal() {
            self.end_active(ctx, drive);
            self.activate(ctx, to, OpEntry::Fresh);
            self.log_change(to, reason);
            let action = self.call(ctx, drive, |op, cx| op.begin(cx, OpEntry::Fresh));
            self.apply(ctx, drive, action, 1);
        }
    }

    /// Apply an action returned by a handler.
    fn apply(
        &mut self,
        ctx: &mut RobotContext,
        drive: &mut dyn Drive,
        action: OpAction,
        depth: usize,
    ) {
        if depth >= MAX_CHAINED_CHANGES {
            warn!(
                "Too many chained operation changes, staying in {}",
                self.active
            );
            return;
        }

        let (to, entry, reason) = match action {
            OpAction::None => return,
            OpAction::Change {
                to,
                return_on_exit,
                reason,
            } => {
                if to == self.active {
                    debug!("Already in {}, change ignored ({})", to, reason);
                    return;
                }

                self.end_active(ctx, drive);

                if return_on_exit {
                    self.chain.push(self.active);
                } else if to.is_goal() {
                    self.chain.clear();
                }

                (to, OpEntry::Fresh, reason)
            }
            OpAction::Resume { reason } => {
                self.end_active(ctx, drive);

                let to = self.chain.pop().unwrap_or(OpKind::Idle);
                (to, OpEntry::Resumed, reason)
            }
        };

        let from = self.active;
        self.activate(ctx, to, entry);
        self.log_change(from, &reason);

        let action = self.call(ctx, drive, |op, cx| op.begin(cx, entry));
        self.apply(ctx, drive, action, depth + 1);
    }

    fn end_active(&mut self, ctx: &mut RobotContext, drive: &mut dyn Drive) {
        self.call(ctx, drive, |op, cx| {
            op.end(cx);
            OpAction::None
        });
    }

    /// Make `to` active without calling any lifecycle functions.
    ///
    /// A resumed operation keeps who initiated it, a fresh one is automatic unless it was the
    /// target of the pending operator command.
    fn activate(&mut self, ctx: &mut RobotContext, to: OpKind, entry: OpEntry) {
        self.active = to;
        let by_operator = self.operator_request.take() == Some(to);

        let base = &mut self.ops[to.index()].base;
        base.should_stop = false;
        base.start_time_s = ctx.now_s;
        if entry == OpEntry::Fresh {
            base.initiated_by_operator = by_operator;
        }

        ctx.goal = self.goal();
    }

    fn log_change(&mut self, from: OpKind, reason: &str) {
        self.transitions += 1;
        info!(
            "{} -> {} ({}), chain: {}",
            from,
            self.active,
            reason,
            self.chain_string()
        );
    }

    /// Call a function of the active operation with a fresh context.
    fn call<F>(&mut self, ctx: &mut RobotContext, drive: &mut dyn Drive, f: F) -> OpAction
    where
        F: FnOnce(&mut dyn Operation, &mut OpCtx) -> OpAction,
    {
        let slot = &mut self.ops[self.active.index()];
        let mut cx = OpCtx {
            ctx,
            drive,
            params: &self.params,
            base: &mut slot.base,
        };

        f(slot.op.as_mut(), &mut cx)
    }
}

fn new_op(kind: OpKind) -> Box<dyn Operation> {
    match kind {
        OpKind::Idle => Box::new(Idle::new()),
        OpKind::ImuCalibration => Box::new(ImuCalibration::new()),
        OpKind::Mow => Box::new(Mow::new()),
        OpKind::EscapeReverse => Box::new(Escape::new(EscapeKind::Reverse)),
        OpKind::EscapeForward => Box::new(Escape::new(EscapeKind::Forward)),
        OpKind::EscapeRotation => Box::new(Escape::new(EscapeKind::Rotation)),
        OpKind::EscapeLawn => Box::new(Escape::new(EscapeKind::Lawn)),
        OpKind::Dock => Box::new(Dock::new()),
        OpKind::Charge => Box::new(Charge::new()),
        OpKind::KidnapWait => Box::new(KidnapWait::new()),
        OpKind::GpsWaitFix => Box::new(GpsWaitFix::new()),
        OpKind::GpsWaitFloat => Box::new(GpsWaitFloat::new()),
        OpKind::DockGpsReboot => Box::new(DockGpsReboot::new()),
        OpKind::GpsRebootRecovery => Box::new(GpsRebootRecovery::new()),
        OpKind::Wait => Box::new(Wait::new()),
        OpKind::Error => Box::new(Error::new()),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::test_utils::Harness;
    use super::*;

    #[test]
    fn test_starts_idle() {
        let mut h = Harness::new();
        h.run();

        assert_eq!(h.active(), OpKind::Idle);
        assert_eq!(h.mgr.goal(), OpKind::Idle);
        assert_eq!(h.mgr.chain_string(), "Idle");
        assert_eq!(h.mgr.transitions(), 0);
    }

    #[test]
    fn test_registry_order() {
        let mgr = OpMgr::new(OpMgrParams::default());
        for (i, k) in OpKind::ALL.iter().enumerate() {
            assert_eq!(k.index(), i);
            assert_eq!(mgr.ops[i].op.kind(), *k);
        }
    }

    #[test]
    fn test_chain_push_and_resume() {
        let mut h = Harness::new();
        h.set(OpType::Mow);
        assert_eq!(h.active(), OpKind::Mow);

        h.change(OpKind::GpsWaitFix, true);
        h.change(OpKind::Wait, true);
        assert_eq!(h.mgr.chain_string(), "Wait->GpsWaitFix->Mow");
        assert_eq!(h.mgr.goal(), OpKind::Mow);

        // Replacing inherits the pending chain
        h.change(OpKind::GpsWaitFloat, false);
        assert_eq!(h.mgr.chain_string(), "GpsWaitFloat->GpsWaitFix->Mow");

        // Goals clear it
        h.change(OpKind::Dock, false);
        assert_eq!(h.mgr.chain_string(), "Dock");
    }

    #[test]
    fn test_resume_empty_chain_goes_idle() {
        let mut h = Harness::new();
        h.change(OpKind::Wait, false);
        assert_eq!(h.active(), OpKind::Wait);

        h.run_for(h.ctx.wait_s + 1.0, 0.1);
        assert_eq!(h.active(), OpKind::Idle);
    }

    #[test]
    fn test_charger_connect_once() {
        let mut h = Harness::new();
        h.ctx.frame.battery.charger_connected = true;

        h.event(RobotEvent::ChargerConnected);
        h.run();
        assert_eq!(h.active(), OpKind::Charge);
        let transitions = h.mgr.transitions();

        h.event(RobotEvent::ChargerConnected);
        h.run();
        h.change(OpKind::Charge, false);
        assert_eq!(h.mgr.transitions(), transitions);

        // Unless repeated on purpose
        h.mgr
            .set_operation(&mut h.ctx, &mut h.drive, OpType::Charge, true);
        assert_eq!(h.mgr.transitions(), transitions + 1);
        assert_eq!(h.active(), OpKind::Charge);
    }

    #[test]
    fn test_imu_calibration_first() {
        let mut h = Harness::new();
        h.ctx.imu_calibration_pending = true;
        h.ctx.frame.imu_found = true;
        h.ctx.frame.imu = Some(Default::default());

        h.set(OpType::Mow);
        assert_eq!(h.active(), OpKind::ImuCalibration);
        assert_eq!(h.mgr.goal(), OpKind::Mow);
        assert_eq!(h.mgr.chain_string(), "ImuCalibration->Mow");
        assert!(h.mgr.base(OpKind::Mow).initiated_by_operator);

        h.run_for(h.mgr.params().imu_calibration.window_s + 1.0, 0.1);
        assert_eq!(h.active(), OpKind::Mow);
        assert!(!h.ctx.imu_calibration_pending);
    }

    #[test]
    fn test_error_sticky_until_acknowledged() {
        let mut h = Harness::new();
        h.set(OpType::Mow);
        h.event(RobotEvent::Anomaly(AnomalyEvent::BumperStuck));

        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::BumperStuck));
        assert_eq!(h.drive.linear_ms, 0.0);

        h.set(OpType::Mow);
        h.run_for(10.0, 0.5);
        assert_eq!(h.active(), OpKind::Error);

        h.mgr.acknowledge_error(&mut h.ctx, &mut h.drive);
        assert_eq!(h.active(), OpKind::Idle);
        assert_eq!(h.ctx.error_cause, None);
    }

    #[test]
    fn test_stop_request() {
        let mut h = Harness::new();
        h.set(OpType::Mow);
        h.mgr.request_stop();
        h.run();

        assert_eq!(h.active(), OpKind::Idle);
        assert!(!h.drive.mow_on);
    }

    #[test]
    fn test_operator_clears_dock_fallbacks() {
        let mut h = Harness::new();
        h.ctx.dock_fallbacks = 2;
        h.set(OpType::Dock);
        assert_eq!(h.ctx.dock_fallbacks, 0);

        h.event(RobotEvent::Anomaly(AnomalyEvent::BumperStuck));
        h.ctx.dock_fallbacks = 2;
        h.mgr.acknowledge_error(&mut h.ctx, &mut h.drive);
        assert_eq!(h.ctx.dock_fallbacks, 0);
    }
}
