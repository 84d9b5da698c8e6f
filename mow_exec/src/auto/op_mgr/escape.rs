//! # Escape operations
//!
//! The four escape manoeuvres share one implementation, parameterised by [`EscapeKind`]. Each is
//! an open loop sequence of timed phases:
//!
//! | Kind     | Phases                        |
//! |----------|-------------------------------|
//! | Reverse  | stop, reverse, turn away      |
//! | Forward  | stop, forward                 |
//! | Rotation | stop, forward                 |
//! | Lawn     | stop, reverse                 |
//!
//! When the last phase ends the interrupted operation is resumed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use serde::Deserialize;

use super::{ErrorCause, ObstacleCause, OpAction, OpCtx, OpEntry, OpKind, Operation};
use crate::auto::detect::BumperSide;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A timed escape manoeuvre.
///
/// Possible transitions:
/// - Resume the interrupted operation once the manoeuvre is complete
/// - Error if the mower is still lifted at the end, on IMU problems, or when too many escapes
///   happen within the escape window
pub struct Escape {
    kind: EscapeKind,
    phases: Vec<Phase>,
    phase_idx: usize,
    phase_start_s: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct EscapeParams {
    pub stop_s: f64,

    pub reverse_s: f64,
    pub reverse_speed_ms: f64,

    pub turn_s: f64,
    pub turn_speed_rads: f64,

    pub forward_s: f64,
    pub forward_speed_ms: f64,

    pub lawn_reverse_s: f64,
    pub lawn_speed_ms: f64,

    /// How long GPS progress checks are suppressed after a lawn escape
    pub gps_suppress_s: f64,

    /// Sliding window over which escapes are counted
    pub window_s: f64,

    /// Most escapes allowed within the window
    pub max_in_window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Phase {
    duration_s: f64,
    linear_ms: f64,
    angular_rads: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeKind {
    /// Back away from an obstacle in front and turn away from it
    Reverse,

    /// Drive forwards away from an obstacle behind
    Forward,

    /// Drive forwards out of a blocked rotation
    Rotation,

    /// Back out of high grass that stalled the mow motor
    Lawn,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for EscapeParams {
    fn default() -> Self {
        Self {
            stop_s: 0.5,
            reverse_s: 3.0,
            reverse_speed_ms: 0.1,
            turn_s: 1.5,
            turn_speed_rads: 0.5,
            forward_s: 2.0,
            forward_speed_ms: 0.1,
            lawn_reverse_s: 1.5,
            lawn_speed_ms: 0.1,
            gps_suppress_s: 10.0,
            window_s: 60.0,
            max_in_window: 6,
        }
    }
}

impl Escape {
    pub fn new(kind: EscapeKind) -> Self {
        Self {
            kind,
            phases: Vec::new(),
            phase_idx: 0,
            phase_start_s: 0.0,
        }
    }

    /// Build the phase list for this escape.
    ///
    /// The turn of a reverse escape points away from the bumper that was hit, a left bumper turns
    /// clockwise.
    fn plan(&self, params: &EscapeParams, last_obstacle: Option<ObstacleCause>) -> Vec<Phase> {
        let stop = Phase {
            duration_s: params.stop_s,
            linear_ms: 0.0,
            angular_rads: 0.0,
        };

        match self.kind {
            EscapeKind::Reverse => {
                let turn_sign = match last_obstacle {
                    Some(ObstacleCause::Bumper(BumperSide::Left)) => -1.0,
                    _ => 1.0,
                };

                vec![
                    stop,
                    Phase {
                        duration_s: params.reverse_s,
                        linear_ms: -params.reverse_speed_ms,
                        angular_rads: 0.0,
                    },
                    Phase {
                        duration_s: params.turn_s,
                        linear_ms: 0.0,
                        angular_rads: turn_sign * params.turn_speed_rads,
                    },
                ]
            }
            EscapeKind::Forward | EscapeKind::Rotation => vec![
                stop,
                Phase {
                    duration_s: params.forward_s,
                    linear_ms: params.forward_speed_ms,
                    angular_rads: 0.0,
                },
            ],
            EscapeKind::Lawn => vec![
                stop,
                Phase {
                    duration_s: params.lawn_reverse_s,
                    linear_ms: -params.lawn_speed_ms,
                    angular_rads: 0.0,
                },
            ],
        }
    }

    fn command(&self, cx: &mut OpCtx) {
        if let Some(phase) = self.phases.get(self.phase_idx) {
            // Stop hard, move ramped
            let use_ramp = phase.linear_ms != 0.0 || phase.angular_rads != 0.0;
            cx.drive
                .set_linear_angular_speed(phase.linear_ms, phase.angular_rads, use_ramp);
        }
    }

    /// Called when the last phase ends.
    fn finish(&mut self, cx: &mut OpCtx) -> OpAction {
        if cx.ctx.frame.lift {
            return cx.escalate(ErrorCause::Lift);
        }

        if self.kind == EscapeKind::Lawn {
            cx.drive.trigger_retry_slow();
            let until_s = cx.now_s() + cx.params.escape.gps_suppress_s;
            cx.ctx.detector.suppress_gps_checks_until(until_s);
        }

        OpAction::resume(format!("{} escape complete", self.kind_name()))
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            EscapeKind::Reverse => "reverse",
            EscapeKind::Forward => "forward",
            EscapeKind::Rotation => "rotation",
            EscapeKind::Lawn => "lawn",
        }
    }
}

impl Operation for Escape {
    fn kind(&self) -> OpKind {
        match self.kind {
            EscapeKind::Reverse => OpKind::EscapeReverse,
            EscapeKind::Forward => OpKind::EscapeForward,
            EscapeKind::Rotation => OpKind::EscapeRotation,
            EscapeKind::Lawn => OpKind::EscapeLawn,
        }
    }

    fn begin(&mut self, cx: &mut OpCtx, entry: OpEntry) -> OpAction {
        let now_s = cx.now_s();

        if entry == OpEntry::Fresh && !cx.ctx.escape_window.record(now_s) {
            return cx.escalate(ErrorCause::EscapesExhausted);
        }

        self.phases = self.plan(&cx.params.escape, cx.ctx.last_obstacle);
        self.phase_idx = 0;
        self.phase_start_s = now_s;

        info!(
            "Starting {} escape ({} in window)",
            self.kind_name(),
            cx.ctx.escape_window.count()
        );

        cx.drive.set_mow_state(false);
        self.command(cx);

        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        let now_s = cx.now_s();

        while let Some(phase) = self.phases.get(self.phase_idx) {
            if now_s - self.phase_start_s < phase.duration_s {
                break;
            }

            self.phase_start_s += phase.duration_s;
            self.phase_idx += 1;
            debug!("{} escape phase {}", self.kind_name(), self.phase_idx);
        }

        if self.phase_idx >= self.phases.len() {
            return self.finish(cx);
        }

        self.command(cx);
        OpAction::None
    }

    fn end(&mut self, cx: &mut OpCtx) {
        let now_s = cx.now_s();
        cx.ctx.detector.reset_motion(now_s);
        cx.ctx.estimator.reset_motion_filters();
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
    use crate::auto::detect::AnomalyEvent;

    fn mowing() -> Harness {
        let mut h = Harness::new();
        h.set(OpType::Mow);
        h.advance(0.02);
        h.run();
        h
    }

    #[test]
    fn test_reverse_sequence() {
        let mut h = mowing();
        h.event(RobotEvent::Anomaly(AnomalyEvent::Bumper(BumperSide::Left)));
        assert_eq!(h.active(), OpKind::EscapeReverse);

        let start = h.drive.commands.len() - 1;
        h.run_for(5.2, 0.1);
        assert_eq!(h.active(), OpKind::Mow);

        let p = EscapeParams::default();
        assert_eq!(
            &h.drive.commands[start..start + 3],
            &[
                (0.0, 0.0),
                (-p.reverse_speed_ms, 0.0),
                (0.0, -p.turn_speed_rads)
            ]
        );
    }

    #[test]
    fn test_right_bumper_turns_left() {
        let mut h = mowing();
        h.event(RobotEvent::Anomaly(AnomalyEvent::Bumper(BumperSide::Right)));
        h.run_for(4.0, 0.1);

        assert_eq!(h.active(), OpKind::EscapeReverse);
        assert!(h.drive.angular_rads > 0.0);
        assert_eq!(h.drive.linear_ms, 0.0);
    }

    #[test]
    fn test_lawn_escape() {
        let mut h = mowing();
        h.event(RobotEvent::MowStall);
        assert_eq!(h.active(), OpKind::EscapeLawn);
        assert!(!h.drive.mow_on);

        h.run_for(1.0, 0.1);
        assert!(h.drive.linear_ms < 0.0);

        h.run_for(1.5, 0.1);
        assert_eq!(h.active(), OpKind::Mow);
        assert_eq!(h.drive.retry_slow_triggers, 1);
    }

    #[test]
    fn test_still_lifted() {
        let mut h = mowing();
        h.event(RobotEvent::Anomaly(AnomalyEvent::Lift));
        h.ctx.frame.lift = true;
        h.run_for(6.0, 0.1);

        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::Lift));
    }

    #[test]
    fn test_escape_window() {
        let mut h = mowing();

        for _ in 0..6 {
            h.event(RobotEvent::Anomaly(AnomalyEvent::Sonar));
            assert_eq!(h.active(), OpKind::EscapeReverse);
            h.run_for(5.2, 0.1);
            assert_eq!(h.active(), OpKind::Mow);
        }

        h.event(RobotEvent::Anomaly(AnomalyEvent::Sonar));
        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::EscapesExhausted));
    }
}
