//! # Charge operation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::Deserialize;

use super::{ErrorCause, OpAction, OpCtx, OpEntry, OpKind, Operation};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// On the charger.
///
/// A lost or bad contact is recovered by a re-touch: back off the contacts a little, then creep
/// forward onto them again.
///
/// Possible transitions:
/// - Mow when charging completes, unless the mower was parked by the operator
/// - Dock after `max_retouch` re-touches without a good contact
/// - Error once the fall backs to Dock exceed `max_dock_fallbacks` before charging completes
/// - Idle when the charger disconnects and re-touching is disabled
pub struct Charge {
    retouches: u32,
    retouch: Option<Retouch>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ChargeParams {
    /// Re-touch the contacts when the charger is lost
    pub retouch: bool,

    pub max_retouch: u32,
    pub retouch_back_s: f64,
    pub retouch_forward_s: f64,
    pub retouch_speed_ms: f64,

    /// Fall backs to Dock allowed before giving up on the charger, reset when charging completes
    /// or on an operator command
    pub max_dock_fallbacks: u32,

    /// Go back to mowing once charged
    pub auto_resume_mow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Retouch {
    phase: RetouchPhase,
    phase_start_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetouchPhase {
    Back,
    Forward,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ChargeParams {
    fn default() -> Self {
        Self {
            retouch: true,
            max_retouch: 3,
            retouch_back_s: 2.0,
            retouch_forward_s: 3.0,
            retouch_speed_ms: 0.05,
            max_dock_fallbacks: 3,
            auto_resume_mow: true,
        }
    }
}

impl Charge {
    pub fn new() -> Self {
        Self {
            retouches: 0,
            retouch: None,
        }
    }

    fn start_retouch(&mut self, cx: &mut OpCtx, reason: &str) -> OpAction {
        self.retouches += 1;
        if self.retouches > cx.params.charge.max_retouch {
            cx.ctx.dock_fallbacks += 1;
            if cx.ctx.dock_fallbacks > cx.params.charge.max_dock_fallbacks {
                warn!(
                    "{}, charger contact lost {} times without charging completing",
                    reason, cx.ctx.dock_fallbacks
                );
                return cx.escalate(ErrorCause::ChargeContactFailed);
            }
            return OpAction::change(OpKind::Dock, format!("{}, re-touch failed", reason));
        }

        info!(
            "{}, re-touching the charger ({}/{})",
            reason, self.retouches, cx.params.charge.max_retouch
        );
        self.retouch = Some(Retouch {
            phase: RetouchPhase::Back,
            phase_start_s: cx.now_s(),
        });

        OpAction::None
    }
}

impl Operation for Charge {
    fn kind(&self) -> OpKind {
        OpKind::Charge
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        self.retouches = 0;
        self.retouch = None;
        cx.stop_motors();
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        let params = cx.params.charge;
        let now_s = cx.now_s();

        let mut retouch = match self.retouch {
            Some(r) => r,
            None => {
                cx.stop_motors();
                return OpAction::None;
            }
        };

        match retouch.phase {
            RetouchPhase::Back => {
                if now_s - retouch.phase_start_s >= params.retouch_back_s {
                    retouch.phase = RetouchPhase::Forward;
                    retouch.phase_start_s = now_s;
                }
            }
            RetouchPhase::Forward => {
                if now_s - retouch.phase_start_s >= params.retouch_forward_s {
                    self.retouch = None;
                    cx.stop_motors();

                    if cx.ctx.frame.battery.charger_connected {
                        return OpAction::None;
                    }
                    return self.start_retouch(cx, "no charger contact after re-touch");
                }
            }
        }

        let speed_ms = match retouch.phase {
            RetouchPhase::Back => -params.retouch_speed_ms,
            RetouchPhase::Forward => params.retouch_speed_ms,
        };
        cx.drive.set_linear_angular_speed(speed_ms, 0.0, false);
        self.retouch = Some(retouch);

        OpAction::None
    }

    fn end(&mut self, cx: &mut OpCtx) {
        self.retouch = None;
        cx.stop_motors();
    }

    fn on_charger_connected(&mut self, cx: &mut OpCtx) -> OpAction {
        if self.retouch.take().is_some() {
            info!("Charger contact restored");
            cx.stop_motors();
        }
        OpAction::None
    }

    fn on_charger_disconnected(&mut self, cx: &mut OpCtx) -> OpAction {
        // Backing off during a re-touch loses the contact on purpose
        if self.retouch.is_some() {
            return OpAction::None;
        }

        if !cx.params.charge.retouch {
            return OpAction::change(OpKind::Idle, "charger disconnected");
        }

        self.start_retouch(cx, "Charger disconnected")
    }

    fn on_bad_charging_contact(&mut self, cx: &mut OpCtx) -> OpAction {
        if self.retouch.is_some() {
            return OpAction::None;
        }

        warn!("Bad charging contact");
        self.start_retouch(cx, "Bad charging contact")
    }

    fn on_charging_completed(&mut self, cx: &mut OpCtx) -> OpAction {
        cx.ctx.dock_fallbacks = 0;

        if !cx.params.charge.auto_resume_mow {
            return OpAction::None;
        }

        if cx.ctx.parked_by_operator {
            info!("Charging completed, staying parked");
            OpAction::None
        } else {
            OpAction::change(OpKind::Mow, "charging completed")
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::{test_utils::Harness, RobotEvent};
    use super::*;

    fn charging() -> Harness {
        let mut h = Harness::new();
        h.ctx.frame.battery.charger_connected = true;
        h.advance(0.5);
        h.run();
        assert_eq!(h.active(), OpKind::Charge);
        h
    }

    #[test]
    fn test_retouch_restores_contact() {
        let mut h = charging();
        h.ctx.frame.battery.charger_connected = false;
        h.event(RobotEvent::ChargerDisconnected);

        h.run_for(1.0, 0.1);
        assert!(h.drive.linear_ms < 0.0);

        h.run_for(2.0, 0.1);
        assert!(h.drive.linear_ms > 0.0);

        h.ctx.frame.battery.charger_connected = true;
        h.event(RobotEvent::ChargerConnected);
        assert_eq!(h.drive.linear_ms, 0.0);

        h.run_for(5.0, 0.1);
        assert_eq!(h.active(), OpKind::Charge);
        assert_eq!(h.drive.linear_ms, 0.0);
    }

    #[test]
    fn test_retouch_exhausted_docks() {
        let mut h = charging();
        h.ctx.frame.battery.charger_connected = false;
        h.event(RobotEvent::ChargerDisconnected);

        h.run_for(20.0, 0.1);
        assert_eq!(h.active(), OpKind::Dock);
        assert_eq!(h.ctx.dock_fallbacks, 1);
    }

    /// Lose the contact, exhaust the re-touches, dock again and reconnect.
    fn lose_contact_and_redock(h: &mut Harness) {
        h.ctx.frame.battery.charger_connected = false;
        h.event(RobotEvent::ChargerDisconnected);
        h.run_for(20.0, 0.1);
        if h.active() != OpKind::Dock {
            return;
        }

        h.ctx.frame.battery.charger_connected = true;
        h.event(RobotEvent::ChargerConnected);
    }

    #[test]
    fn test_failing_contact_escalates() {
        let mut h = charging();

        for _ in 0..3 {
            lose_contact_and_redock(&mut h);
            assert_eq!(h.active(), OpKind::Charge);
        }

        lose_contact_and_redock(&mut h);
        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::ChargeContactFailed));
    }

    #[test]
    fn test_completed_charge_clears_fallbacks() {
        let mut h = charging();

        for _ in 0..3 {
            lose_contact_and_redock(&mut h);
        }
        assert_eq!(h.ctx.dock_fallbacks, 3);

        // Stay on the charger once completed
        h.ctx.parked_by_operator = true;
        h.event(RobotEvent::ChargingCompleted);
        assert_eq!(h.ctx.dock_fallbacks, 0);

        lose_contact_and_redock(&mut h);
        assert_eq!(h.active(), OpKind::Charge);
        assert_eq!(h.ctx.dock_fallbacks, 1);
    }

    #[test]
    fn test_completed_resumes_mowing() {
        let mut h = charging();
        h.event(RobotEvent::ChargingCompleted);
        assert_eq!(h.active(), OpKind::Mow);

        let mut h = charging();
        h.ctx.parked_by_operator = true;
        h.event(RobotEvent::ChargingCompleted);
        assert_eq!(h.active(), OpKind::Charge);
    }
}
