//! # GPS wait operations

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::Deserialize;

use comms_if::eqpt::sensors::GpsSolution;

use super::{ErrorCause, OpAction, OpCtx, OpEntry, OpKind, Operation};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Stand still until the GPS solution is FIXED again.
///
/// The receiver is rebooted every `reset_time_s` while waiting.
///
/// Possible transitions:
/// - Resume on a fixed solution
/// - Error after `max_resets` reboots without a fix
pub struct GpsWaitFix {
    resets: u32,
    next_reset_s: f64,
}

/// Stand still until the GPS solution is at least FLOAT again.
///
/// Possible transitions:
/// - Resume on a valid solution
/// - Error after `timeout_s`
pub struct GpsWaitFloat;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GpsWaitFixParams {
    pub reset_time_s: f64,
    pub max_resets: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GpsWaitFloatParams {
    pub timeout_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GpsWaitFixParams {
    fn default() -> Self {
        Self {
            reset_time_s: 600.0,
            max_resets: 3,
        }
    }
}

impl Default for GpsWaitFloatParams {
    fn default() -> Self {
        Self { timeout_s: 600.0 }
    }
}

impl GpsWaitFix {
    pub fn new() -> Self {
        Self {
            resets: 0,
            next_reset_s: 0.0,
        }
    }
}

impl GpsWaitFloat {
    pub fn new() -> Self {
        Self
    }
}

impl Operation for GpsWaitFix {
    fn kind(&self) -> OpKind {
        OpKind::GpsWaitFix
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        warn!("No GPS fix, waiting");
        self.resets = 0;
        self.next_reset_s = cx.now_s() + cx.params.gps_wait_fix.reset_time_s;
        cx.stop_motors();
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        if cx.ctx.estimator.gps_solution() == GpsSolution::Fixed {
            return OpAction::resume("GPS fix");
        }

        if cx.now_s() >= self.next_reset_s {
            self.resets += 1;
            if self.resets > cx.params.gps_wait_fix.max_resets {
                return cx.escalate(ErrorCause::GpsFixTimeout);
            }

            info!(
                "Still no GPS fix, rebooting receiver ({}/{})",
                self.resets, cx.params.gps_wait_fix.max_resets
            );
            cx.ctx.requests.gps_reboots += 1;
            self.next_reset_s += cx.params.gps_wait_fix.reset_time_s;
        }

        OpAction::None
    }
}

impl Operation for GpsWaitFloat {
    fn kind(&self) -> OpKind {
        OpKind::GpsWaitFloat
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        warn!("No GPS signal, waiting");
        cx.stop_motors();
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        if cx.ctx.estimator.gps_solution().is_valid() {
            return OpAction::resume("GPS signal");
        }

        if cx.elapsed_s() > cx.params.gps_wait_float.timeout_s {
            return cx.escalate(ErrorCause::GpsNoSignal);
        }

        OpAction::None
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use comms_if::eqpt::sensors::GpsSample;

    use super::super::{test_utils::Harness, OpType, RobotEvent};
    use super::*;
    use crate::auto::{line_tracker::TrackEvent, loc::EstimatorInput};

    fn gps(h: &mut Harness, solution: GpsSolution) {
        let input = EstimatorInput {
            time_s: h.ctx.now_s,
            gps: Some(GpsSample {
                solution,
                ..Default::default()
            }),
            ..Default::default()
        };
        h.ctx.estimator.compute_pose(&input);
    }

    #[test]
    fn test_wait_fix_resumes() {
        let mut h = Harness::new();
        h.set(OpType::Mow);
        h.event(RobotEvent::Track(TrackEvent::GpsFixTimeout));
        assert_eq!(h.active(), OpKind::GpsWaitFix);

        gps(&mut h, GpsSolution::Float);
        h.run_for(10.0, 1.0);
        assert_eq!(h.active(), OpKind::GpsWaitFix);

        gps(&mut h, GpsSolution::Fixed);
        h.advance(1.0);
        h.run();
        assert_eq!(h.active(), OpKind::Mow);
    }

    #[test]
    fn test_wait_fix_gives_up() {
        let mut h = Harness::new();
        h.set(OpType::Mow);
        h.event(RobotEvent::Track(TrackEvent::GpsFixTimeout));

        h.run_for(2500.0, 10.0);
        assert_eq!(h.ctx.requests.gps_reboots, 3);
        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::GpsFixTimeout));
    }

    #[test]
    fn test_wait_float() {
        let mut h = Harness::new();
        h.set(OpType::Dock);
        h.event(RobotEvent::GpsNoSignal);
        assert_eq!(h.active(), OpKind::GpsWaitFloat);

        gps(&mut h, GpsSolution::Float);
        h.advance(1.0);
        h.run();
        assert_eq!(h.active(), OpKind::Dock);

        h.event(RobotEvent::GpsNoSignal);
        gps(&mut h, GpsSolution::Invalid);
        h.run_for(620.0, 10.0);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::GpsNoSignal));
    }
}
