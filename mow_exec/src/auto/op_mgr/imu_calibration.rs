//! # IMU calibration operation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use serde::Deserialize;

use util::maths::ang_dist;

use super::{ErrorCause, OpAction, OpCtx, OpEntry, OpKind, Operation};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Stand still until the IMU yaw has settled.
///
/// The yaw must stay within `max_drift_rad` of the yaw at the start of a window for `window_s`.
/// Any larger drift restarts the window.
///
/// Possible transitions:
/// - Resume the pending goal once settled, or straight away without an IMU
/// - Error if the yaw does not settle before `timeout_s`
pub struct ImuCalibration {
    window_start_s: f64,
    window_yaw_rad: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ImuCalibrationParams {
    pub window_s: f64,
    pub max_drift_rad: f64,
    pub timeout_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ImuCalibrationParams {
    fn default() -> Self {
        Self {
            window_s: 5.0,
            max_drift_rad: 0.5f64.to_radians(),
            timeout_s: 60.0,
        }
    }
}

impl ImuCalibration {
    pub fn new() -> Self {
        Self {
            window_start_s: 0.0,
            window_yaw_rad: None,
        }
    }
}

impl Operation for ImuCalibration {
    fn kind(&self) -> OpKind {
        OpKind::ImuCalibration
    }

    fn begin(&mut self, cx: &mut OpCtx, _entry: OpEntry) -> OpAction {
        cx.stop_motors();
        self.window_start_s = cx.now_s();
        self.window_yaw_rad = None;
        OpAction::None
    }

    fn run(&mut self, cx: &mut OpCtx) -> OpAction {
        let params = cx.params.imu_calibration;

        if !cx.ctx.frame.imu_found {
            info!("No IMU, skipping calibration");
            cx.ctx.imu_calibration_pending = false;
            return OpAction::resume("no IMU");
        }

        if cx.elapsed_s() > params.timeout_s {
            return cx.escalate(ErrorCause::ImuError);
        }

        let yaw_rad = match cx.ctx.frame.imu {
            Some(imu) => imu.yaw_rad,
            None => return OpAction::None,
        };

        match self.window_yaw_rad {
            Some(start_rad) if ang_dist(yaw_rad, start_rad).abs() > params.max_drift_rad => {
                debug!("IMU yaw still drifting, restarting calibration window");
                self.window_start_s = cx.now_s();
                self.window_yaw_rad = Some(yaw_rad);
            }
            Some(_) => {
                if cx.now_s() - self.window_start_s >= params.window_s {
                    info!("IMU calibrated after {:.1} s", cx.elapsed_s());
                    cx.ctx.imu_calibration_pending = false;
                    return OpAction::resume("IMU calibrated");
                }
            }
            None => {
                self.window_start_s = cx.now_s();
                self.window_yaw_rad = Some(yaw_rad);
            }
        }

        OpAction::None
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use comms_if::eqpt::sensors::ImuSample;

    use super::super::{test_utils::Harness, OpType};
    use super::*;

    fn calibrating() -> Harness {
        let mut h = Harness::new();
        h.ctx.imu_calibration_pending = true;
        h.ctx.frame.imu_found = true;
        h.ctx.frame.imu = Some(ImuSample::default());
        h.set(OpType::Dock);
        assert_eq!(h.active(), OpKind::ImuCalibration);
        h
    }

    #[test]
    fn test_drift_restarts_window() {
        let mut h = calibrating();

        h.run_for(4.0, 0.5);
        h.ctx.frame.imu = Some(ImuSample {
            yaw_rad: 2f64.to_radians(),
            ..Default::default()
        });
        h.run_for(4.0, 0.5);
        assert_eq!(h.active(), OpKind::ImuCalibration);

        h.run_for(2.0, 0.5);
        assert_eq!(h.active(), OpKind::Dock);
    }

    #[test]
    fn test_never_settles() {
        let mut h = calibrating();

        let mut yaw_rad = 0.0;
        while h.ctx.now_s < 70.0 && h.active() == OpKind::ImuCalibration {
            yaw_rad += 1f64.to_radians();
            h.ctx.frame.imu = Some(ImuSample {
                yaw_rad,
                ..Default::default()
            });
            h.advance(0.5);
            h.run();
        }

        assert_eq!(h.active(), OpKind::Error);
        assert_eq!(h.ctx.error_cause, Some(ErrorCause::ImuError));
    }

    #[test]
    fn test_no_imu_skips() {
        let mut h = calibrating();
        h.ctx.frame.imu_found = false;
        h.advance(0.1);
        h.run();

        assert_eq!(h.active(), OpKind::Dock);
        assert!(!h.ctx.imu_calibration_pending);
    }
}
