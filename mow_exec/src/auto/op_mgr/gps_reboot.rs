//! # GPS receiver reboot operations

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use serde::Deserialize;

use comms_if::eqpt::sensors::GpsSolution;

use super::{ErrorCause, OpAction, OpCtx, OpEntry, OpKind, Operation};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Reboot the GPS receiver at the reboot point of the dock path, then wait for a fix.
///
/// Possible transitions:
/// - Resume once the receiver has a fix again, but not before `reboot_wait_s`
/// - Error if no fix arrives within `fix_timeout_s`
pub struct DockGpsReboot;

/// Reboot the GPS receiver as part of a kidnap recovery, then resume after `reboot_wait_s`.
pub struct GpsRebootRecovery;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GpsRebootParams {
    /// Time the receiver needs to come back after a reboot
    pub reboot_wait_s: f64,

    /// Time to wait for a fix after a dock path reboot
    pub fix_timeout_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GpsRebootParams {
    fn default() -> Self {
        Self {
            reboot_wait_s: 30.0,
            fix_timeout_s: 300.0,
        }
    }
}

impl DockGpsReboot {
    pub fn new() -> Self {
        Self
    }
}

impl GpsRebootRecovery {
    pub fn new() -> Self {
        Self
    }
}

/// Stop and ask the driver layer to reboot the receiver.
fn request_reboot(cx: &mut OpCtx) {
    info!("Requesting GPS receiver reboot");
    cx.stop_motors();
    cx.ctx.requests.gps_reboots += 1;
}

impl Operation for DockGpsReboot {
    fn kind(&self) -> OpKind {
        OpKind::DockGpsReboot
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        cx.ctx.path.clear_gps_reboot();
        request_reboot(cx);
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        let params = cx.params.gps_reboot;

        if cx.elapsed_s() >= params.reboot_wait_s
            && cx.ctx.estimator.gps_solution() == GpsSolution::Fixed
        {
            return OpAction::resume("GPS fix after reboot");
        }

        if cx.elapsed_s() > params.fix_timeout_s {
            return cx.escalate(ErrorCause::GpsRebootFailed);
        }

        OpAction::None
    }
}

impl Operation for GpsRebootRecovery {
    fn kind(&self) -> OpKind {
        OpKind::GpsRebootRecovery
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        request_reboot(cx);
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        if cx.elapsed_s() >= cx.params.gps_reboot.reboot_wait_s {
            OpAction::resume("GPS reboot wait over")
        } else {
            OpAction::None
        }
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

    fn rebooting() -> Harness {
        let mut h = Harness::new();
        h.set(OpType::Dock);
        h.event(RobotEvent::Track(TrackEvent::DockGpsReboot));
        assert_eq!(h.active(), OpKind::DockGpsReboot);
        assert_eq!(h.ctx.requests.gps_reboots, 1);
        h
    }

    /// Feed the estimator a fixed solution at the current time.
    fn fix(h: &mut Harness) {
        let input = EstimatorInput {
            time_s: h.ctx.now_s,
            gps: Some(GpsSample {
                solution: GpsSolution::Fixed,
                ..Default::default()
            }),
            ..Default::default()
        };
        h.ctx.estimator.compute_pose(&input);
    }

    #[test]
    fn test_resumes_after_wait_and_fix() {
        let mut h = rebooting();
        fix(&mut h);

        h.run_for(20.0, 1.0);
        assert_eq!(h.active(), OpKind::DockGpsReboot);

        h.run_for(11.0, 1.0);
        assert_eq!(h.active(), OpKind::Dock);
    }

    #[test]
    fn test_no_fix() {
        let mut h = rebooting();
        h.run_for(301.0, 1.0);

        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::GpsRebootFailed));
    }
}
