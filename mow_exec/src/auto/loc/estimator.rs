//! # State estimator
//!
//! Per cycle the estimator:
//!
//! 1. Converts encoder deltas into a travelled distance and a wheel yaw delta.
//! 2. Integrates the position along the heading held at the start of the cycle.
//! 3. Advances the heading by the IMU yaw delta if an IMU is available and enabled, otherwise by
//!    the wheel yaw delta. The two are never mixed, so a rotation is only ever counted once.
//! 4. Handles a new GPS sample: rejects jumps, fuses the GPS heading derived from consecutive
//!    samples and sets the position according to the fusion policy.
//! 5. Updates the filtered yaw rates used by the anomaly detector.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{convert::Infallible, f64::consts::PI};

use log::{debug, info, warn};
use nalgebra::Vector2;

use comms_if::eqpt::sensors::{EncoderDeltas, GpsSample, GpsSolution, ImuSample};
use util::{
    maths::{ang_dist, fuse_angles, normalize_angle, LowPass},
    module::State,
    params,
    session::Session,
};

use super::{GpsJump, LocParams, Pose, SpeedState};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Fuses odometry, IMU and GPS into the mower's [`Pose`] and [`SpeedState`].
///
/// The estimator is the only writer of the pose.
#[derive(Debug, Clone)]
pub struct StateEstimator {
    params: LocParams,

    pose: Pose,
    speed: SpeedState,
    report: EstimatorReport,

    /// Time of the previous cycle
    last_time_s: Option<f64>,

    /// Yaw of the previous IMU sample, `None` until a baseline sample has been seen
    last_imu_yaw_rad: Option<f64>,
    last_imu_time_s: Option<f64>,
    imu_timeout_reported: bool,

    /// Position and estimated heading at the last GPS reference sample
    gps_ref: Option<(Vector2<f64>, f64)>,

    /// Re-anchor the GPS reference at the next sample
    reset_gps_ref: bool,

    last_gps_time_s: Option<f64>,
    last_fix_time_s: Option<f64>,
    last_valid_gps_time_s: Option<f64>,
    gps_solution: GpsSolution,
    gps_jumps: u32,

    yaw_rate_imu_lp: LowPass,
    yaw_rate_wheels_lp: LowPass,
    yaw_rate_abs_lp: LowPass,
    yaw_diff_lp: LowPass,
}

/// Data the estimator needs each cycle.
#[derive(Debug, Clone, Default)]
pub struct EstimatorInput {
    pub time_s: f64,

    pub encoders: EncoderDeltas,

    /// An IMU was detected at start up
    pub imu_found: bool,

    /// Fresh IMU sample, if any
    pub imu: Option<ImuSample>,

    /// Fresh GPS sample, if any
    pub gps: Option<GpsSample>,

    /// Linear speed currently commanded to the drive
    pub linear_speed_set_ms: f64,

    /// Angular speed currently commanded to the drive
    pub angular_speed_set_rads: f64,
}

/// Status report of one estimator cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EstimatorReport {
    /// Set if the GPS sample of this cycle was rejected as a jump
    pub gps_jump: Option<GpsJump>,

    /// The GPS sample of this cycle set the position
    pub gps_pos_applied: bool,

    /// The GPS sample of this cycle corrected the heading
    pub gps_heading_applied: bool,

    /// Set on the single cycle the IMU is declared lost, the driver should be restarted
    pub imu_timeout: bool,

    /// The IMU reports a roll or pitch beyond the tilt limit
    pub imu_tilt: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LocError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(params::LoadError),
}

/// What the IMU contributes to the heading this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ImuYaw {
    /// Yaw change since the previous IMU sample
    Delta(f64),

    /// The IMU is alive but no fresh sample arrived, the rotation is picked up by the next one
    Pending,

    /// No usable IMU, fall back to odometry
    Unavailable,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for StateEstimator {
    fn default() -> Self {
        Self::new(LocParams::default())
    }
}

impl State for StateEstimator {
    type InitData = &'static str;
    type InitError = LocError;

    type InputData = EstimatorInput;
    type OutputData = (Pose, SpeedState);
    type StatusReport = EstimatorReport;
    type ProcError = Infallible;

    /// Load the parameters from the given file.
    fn init(&mut self, init_data: Self::InitData, _session: &Session) -> Result<(), LocError> {
        let params = params::load(init_data).map_err(LocError::ParamLoadError)?;
        *self = Self::new(params);
        Ok(())
    }

    fn proc(
        &mut self,
        input_data: &EstimatorInput,
    ) -> Result<((Pose, SpeedState), EstimatorReport), Infallible> {
        let (pose, speed, _) = self.compute_pose(input_data);
        Ok(((pose, speed), self.report))
    }
}

impl StateEstimator {
    pub fn new(params: LocParams) -> Self {
        Self {
            yaw_rate_imu_lp: LowPass::new(params.yaw_rate_lp_hz),
            yaw_rate_wheels_lp: LowPass::new(params.yaw_rate_lp_hz),
            yaw_rate_abs_lp: LowPass::new(params.abs_yaw_rate_lp_hz),
            yaw_diff_lp: LowPass::new(params.yaw_diff_lp_hz),
            params,
            pose: Pose::default(),
            speed: SpeedState::default(),
            report: EstimatorReport::default(),
            last_time_s: None,
            last_imu_yaw_rad: None,
            last_imu_time_s: None,
            imu_timeout_reported: false,
            gps_ref: None,
            reset_gps_ref: false,
            last_gps_time_s: None,
            last_fix_time_s: None,
            last_valid_gps_time_s: None,
            gps_solution: GpsSolution::Invalid,
            gps_jumps: 0,
        }
    }

    /// Run one estimation cycle.
    ///
    /// Never fails: missing sensors degrade the estimate rather than stopping it.
    pub fn compute_pose(&mut self, input: &EstimatorInput) -> (Pose, SpeedState, Option<GpsJump>) {
        let mut report = EstimatorReport::default();

        let dt_s = match self.last_time_s {
            Some(t) if input.time_s > t => input.time_s - t,
            _ => 0.0,
        };
        self.last_time_s = Some(input.time_s);

        // ---- ODOMETRY ----

        let dist_left_m = input.encoders.left_ticks as f64 / self.params.ticks_per_m;
        let dist_right_m = input.encoders.right_ticks as f64 / self.params.ticks_per_m;
        let dist_m = (dist_left_m + dist_right_m) / 2.0;
        let wheel_delta_rad = (dist_right_m - dist_left_m) / self.params.wheel_base_m;

        let imu_yaw = self.imu_yaw(input, &mut report);

        // The GPS reference is re-anchored while the mower is commanded to stand still
        if input.linear_speed_set_ms.abs() < self.params.motor_min_speed_ms / 2.0 {
            self.reset_gps_ref = true;
        }

        // ---- DEAD RECKONING ----

        let heading_rad = self.pose.heading_rad();
        self.pose.position_m += dist_m * self.pose.forward2();

        let heading_delta_rad = match (self.params.use_imu, imu_yaw) {
            (true, ImuYaw::Delta(d)) => d,
            (true, ImuYaw::Pending) => 0.0,
            _ => wheel_delta_rad,
        };
        self.pose.set_heading(heading_rad + heading_delta_rad);

        // ---- GPS ----

        let gps_jump = match input.gps {
            Some(ref sample) => {
                self.speed.ground_speed_ms = sample.ground_speed_ms;
                self.apply_gps(input, sample, &mut report)
            }
            None => None,
        };

        // ---- SPEEDS ----

        if dt_s > 0.0 {
            let wheel_rate_rads = wheel_delta_rad / dt_s;

            self.speed.linear_ms = dist_m / dt_s;
            self.speed.angular_rads = heading_delta_rad / dt_s;
            self.speed.yaw_rate_wheels_rads = self.yaw_rate_wheels_lp.update(wheel_rate_rads, dt_s);
            self.speed.yaw_rate_lp_rads = self
                .yaw_rate_abs_lp
                .update(self.speed.angular_rads.abs(), dt_s);

            if let ImuYaw::Delta(d) = imu_yaw {
                let imu_rate_rads = d / dt_s;
                self.speed.yaw_rate_imu_rads = self.yaw_rate_imu_lp.update(imu_rate_rads, dt_s);
                self.speed.yaw_diff_lp_rads = self
                    .yaw_diff_lp
                    .update((imu_rate_rads - wheel_rate_rads).abs(), dt_s);
            }
        }

        report.gps_jump = gps_jump;
        self.report = report;

        (self.pose, self.speed, gps_jump)
    }

    /// Zero all yaw rate filters, used once an anomaly has been handled or a rotation settles so
    /// that stale rates don't trigger the next check.
    pub fn reset_motion_filters(&mut self) {
        self.yaw_rate_imu_lp.reset();
        self.yaw_rate_wheels_lp.reset();
        self.yaw_rate_abs_lp.reset();
        self.yaw_diff_lp.reset();

        self.speed.yaw_rate_imu_rads = 0.0;
        self.speed.yaw_rate_wheels_rads = 0.0;
        self.speed.yaw_rate_lp_rads = 0.0;
        self.speed.yaw_diff_lp_rads = 0.0;
    }

    /// Overwrite the pose, e.g. when restarting at a known location.
    pub fn set_pose(&mut self, pose: Pose) {
        info!(
            "Pose set to ({:.2}, {:.2}, {:.1} deg)",
            pose.x_m(),
            pose.y_m(),
            pose.heading_rad().to_degrees()
        );
        self.pose = pose;
        self.gps_ref = None;
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn speed(&self) -> SpeedState {
        self.speed
    }

    pub fn report(&self) -> EstimatorReport {
        self.report
    }

    pub fn params(&self) -> &LocParams {
        &self.params
    }

    /// Quality of the most recent GPS sample.
    pub fn gps_solution(&self) -> GpsSolution {
        self.gps_solution
    }

    /// Number of GPS jumps rejected since start up.
    pub fn gps_jumps(&self) -> u32 {
        self.gps_jumps
    }

    pub fn set_gps_jumps(&mut self, gps_jumps: u32) {
        self.gps_jumps = gps_jumps;
    }

    /// Time of the last FIXED sample.
    pub fn last_fix_time_s(&self) -> Option<f64> {
        self.last_fix_time_s
    }

    /// Time of the last FLOAT or FIXED sample.
    pub fn last_valid_gps_time_s(&self) -> Option<f64> {
        self.last_valid_gps_time_s
    }

    fn imu_yaw(&mut self, input: &EstimatorInput, report: &mut EstimatorReport) -> ImuYaw {
        if !input.imu_found {
            self.last_imu_yaw_rad = None;
            return ImuYaw::Unavailable;
        }

        match input.imu {
            Some(imu) => {
                self.last_imu_time_s = Some(input.time_s);
                self.imu_timeout_reported = false;

                if imu.roll_rad.abs() > self.params.imu_tilt_limit_rad
                    || imu.pitch_rad.abs() > self.params.imu_tilt_limit_rad
                {
                    report.imu_tilt = true;
                }

                // The first sample only sets the baseline
                match self.last_imu_yaw_rad.replace(imu.yaw_rad) {
                    Some(last) => ImuYaw::Delta(ang_dist(last, imu.yaw_rad)),
                    None => ImuYaw::Unavailable,
                }
            }
            None => {
                if self.last_imu_yaw_rad.is_none() {
                    return ImuYaw::Unavailable;
                }

                let last_time_s = *self.last_imu_time_s.get_or_insert(input.time_s);
                if input.time_s - last_time_s > self.params.imu_timeout_s {
                    if !self.imu_timeout_reported {
                        warn!(
                            "No IMU data for {:.2} s, requesting IMU restart",
                            input.time_s - last_time_s
                        );
                        report.imu_timeout = true;
                        self.imu_timeout_reported = true;
                    }
                    self.last_imu_yaw_rad = None;
                    ImuYaw::Unavailable
                } else {
                    ImuYaw::Pending
                }
            }
        }
    }

    fn apply_gps(
        &mut self,
        input: &EstimatorInput,
        sample: &GpsSample,
        report: &mut EstimatorReport,
    ) -> Option<GpsJump> {
        self.gps_solution = sample.solution;

        match sample.solution {
            GpsSolution::Invalid => return None,
            GpsSolution::Float => self.last_valid_gps_time_s = Some(input.time_s),
            GpsSolution::Fixed => {
                self.last_valid_gps_time_s = Some(input.time_s);
                self.last_fix_time_s = Some(input.time_s);
            }
        }

        let pos_m = Vector2::new(sample.east_m, sample.north_m);
        let dt_s = self.last_gps_time_s.map(|t| input.time_s - t);
        self.last_gps_time_s = Some(input.time_s);

        let (ref_pos_m, ref_heading_rad) = match self.gps_ref {
            Some(r) => r,
            None => {
                // The first sample can't be a jump
                self.gps_ref = Some((pos_m, self.pose.heading_rad()));
                self.reset_gps_ref = false;
                self.apply_gps_position(sample.solution, pos_m, report);
                return None;
            }
        };

        let delta_m = pos_m - ref_pos_m;
        let dist_m = delta_m.norm();

        if dist_m > self.params.gps_jump_dist_m || self.reset_gps_ref {
            if let Some(dt_s) = dt_s {
                if dist_m > self.params.gps_jump_dist_m && dt_s < self.params.gps_jump_window_s {
                    self.gps_jumps += 1;
                    warn!(
                        "GPS jump of {:.2} m in {:.3} s rejected ({} so far)",
                        dist_m, dt_s, self.gps_jumps
                    );

                    // Re-anchor so a genuine relocation is accepted on the following sample
                    self.gps_ref = Some((pos_m, self.pose.heading_rad()));

                    return Some(GpsJump {
                        distance_m: dist_m,
                        dt_s,
                    });
                }
            }
            self.gps_ref = Some((pos_m, self.pose.heading_rad()));
            self.reset_gps_ref = false;
        } else if dist_m > self.params.gps_heading_min_dist_m {
            self.fuse_gps_heading(input, sample.solution, delta_m, ref_heading_rad, report);
            self.gps_ref = Some((pos_m, self.pose.heading_rad()));
        }

        self.apply_gps_position(sample.solution, pos_m, report);

        None
    }

    fn fuse_gps_heading(
        &mut self,
        input: &EstimatorInput,
        solution: GpsSolution,
        delta_m: Vector2<f64>,
        ref_heading_rad: f64,
        report: &mut EstimatorReport,
    ) {
        let allowed = match solution {
            GpsSolution::Fixed => self.params.use_gps_fix_for_heading,
            GpsSolution::Float => self.params.use_gps_float_for_heading,
            GpsSolution::Invalid => false,
        };
        if !allowed {
            return;
        }

        // Only a straight drive gives a meaningful heading between two samples
        let turned_rad = ang_dist(ref_heading_rad, self.pose.heading_rad()).abs();
        if turned_rad >= self.params.gps_heading_max_turn_rad
            || input.linear_speed_set_ms == 0.0
            || input.angular_speed_set_rads.abs() >= self.params.gps_heading_max_ang_speed_rads
        {
            return;
        }

        let mut gps_heading_rad = delta_m[1].atan2(delta_m[0]);
        if input.linear_speed_set_ms < 0.0 {
            gps_heading_rad = normalize_angle(gps_heading_rad + PI);
        }

        let diff_rad = ang_dist(self.pose.heading_rad(), gps_heading_rad);
        if diff_rad.abs() > self.params.gps_heading_snap_rad {
            debug!(
                "Heading snapped to GPS heading ({:.1} deg off)",
                diff_rad.to_degrees()
            );
            self.pose.set_heading(gps_heading_rad);
        } else {
            self.pose.set_heading(fuse_angles(
                self.pose.heading_rad(),
                gps_heading_rad,
                self.params.gps_heading_weight,
            ));
        }

        report.gps_heading_applied = true;
    }

    fn apply_gps_position(
        &mut self,
        solution: GpsSolution,
        pos_m: Vector2<f64>,
        report: &mut EstimatorReport,
    ) {
        let allowed = match solution {
            GpsSolution::Fixed => self.params.use_gps_fix_for_pos,
            GpsSolution::Float => self.params.use_gps_float_for_pos,
            GpsSolution::Invalid => false,
        };

        if allowed {
            self.pose.position_m = pos_m;
            report.gps_pos_applied = true;
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const EPS: f64 = 1e-9;

    fn input(time_s: f64) -> EstimatorInput {
        EstimatorInput {
            time_s,
            linear_speed_set_ms: 0.3,
            ..Default::default()
        }
    }

    fn fixed(east_m: f64, north_m: f64) -> Option<GpsSample> {
        Some(GpsSample {
            solution: GpsSolution::Fixed,
            north_m,
            east_m,
            ground_speed_ms: 0.3,
        })
    }

    #[test]
    fn test_odometry_straight() {
        let mut est = StateEstimator::default();
        let ticks = est.params().ticks_per_m as i64;

        let mut i = input(0.0);
        i.encoders = EncoderDeltas {
            left_ticks: ticks,
            right_ticks: ticks,
        };
        let (pose, _, jump) = est.compute_pose(&i);

        assert!((pose.x_m() - 1.0).abs() < EPS);
        assert!(pose.y_m().abs() < EPS);
        assert!(pose.heading_rad().abs() < EPS);
        assert!(jump.is_none());
    }

    #[test]
    fn test_odometry_heading_without_imu() {
        let mut est = StateEstimator::default();
        let wheel_base_m = est.params().wheel_base_m;
        let ticks_per_m = est.params().ticks_per_m;

        // Right wheel forward, left back: counter-clockwise turn on the spot
        let mut i = input(0.1);
        i.encoders = EncoderDeltas {
            left_ticks: -100,
            right_ticks: 100,
        };
        let (pose, _, _) = est.compute_pose(&i);

        let expected = 200.0 / ticks_per_m / wheel_base_m;
        assert!((pose.heading_rad() - expected).abs() < EPS);
        assert!(pose.position_m.norm() < EPS);
    }

    #[test]
    fn test_imu_heading_excludes_odometry() {
        let mut est = StateEstimator::default();

        let mut i = input(0.0);
        i.imu_found = true;
        i.imu = Some(ImuSample {
            yaw_rad: 0.2,
            ..Default::default()
        });
        est.compute_pose(&i);

        // Odometry claims a large turn but the IMU says 0.1 rad
        let mut i = input(0.02);
        i.imu_found = true;
        i.imu = Some(ImuSample {
            yaw_rad: 0.3,
            ..Default::default()
        });
        i.encoders = EncoderDeltas {
            left_ticks: -200,
            right_ticks: 200,
        };
        let heading_before = est.pose().heading_rad();
        let (pose, _, _) = est.compute_pose(&i);
        assert!((pose.heading_rad() - heading_before - 0.1).abs() < 1e-6);

        // No fresh sample, the rotation isn't taken from odometry either
        let mut i = input(0.04);
        i.imu_found = true;
        i.encoders = EncoderDeltas {
            left_ticks: -200,
            right_ticks: 200,
        };
        let heading_before = est.pose().heading_rad();
        let (pose, _, _) = est.compute_pose(&i);
        assert!((pose.heading_rad() - heading_before).abs() < EPS);
    }

    #[test]
    fn test_imu_timeout_reported_once() {
        let mut est = StateEstimator::default();
        let timeout_s = est.params().imu_timeout_s;

        let mut i = input(0.0);
        i.imu_found = true;
        i.imu = Some(ImuSample::default());
        est.compute_pose(&i);

        let mut reports = 0;
        let mut t = 0.0;
        while t < 3.0 * timeout_s {
            t += 0.1;
            let mut i = input(t);
            i.imu_found = true;
            est.compute_pose(&i);
            if est.report().imu_timeout {
                reports += 1;
            }
        }
        assert_eq!(reports, 1);
    }

    #[test]
    fn test_gps_jump_fast() {
        let mut est = StateEstimator::default();

        let mut i = input(0.0);
        i.gps = fixed(0.0, 0.0);
        assert!(est.compute_pose(&i).2.is_none());

        // 1 m in 0.2 s
        let mut i = input(0.2);
        i.gps = fixed(1.0, 0.0);
        let (pose, _, jump) = est.compute_pose(&i);

        let jump = jump.expect("expected a GPS jump");
        assert!((jump.distance_m - 1.0).abs() < EPS);
        assert_eq!(est.gps_jumps(), 1);
        assert!(est.report().gps_jump.is_some());
        assert!(!est.report().gps_pos_applied);
        assert!(pose.x_m().abs() < EPS);
    }

    #[test]
    fn test_gps_slow_large_displacement_not_jump() {
        let mut est = StateEstimator::default();

        let mut i = input(0.0);
        i.gps = fixed(0.0, 0.0);
        est.compute_pose(&i);

        // 1 m over 5 s
        let mut i = input(5.0);
        i.gps = fixed(1.0, 0.0);
        let (pose, _, jump) = est.compute_pose(&i);

        assert!(jump.is_none());
        assert_eq!(est.gps_jumps(), 0);
        assert!((pose.x_m() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_gps_heading_fusion_shorter_arc() {
        let mut est = StateEstimator::default();
        est.set_pose(Pose::new(0.0, 0.0, 0.0));

        let mut i = input(0.0);
        i.gps = fixed(0.0, 0.0);
        est.compute_pose(&i);

        // Moving slightly north of east
        let mut i = input(0.2);
        i.gps = fixed(0.2, 0.05);
        let (pose, _, _) = est.compute_pose(&i);

        let gps_heading = 0.05f64.atan2(0.2);
        assert!(est.report().gps_heading_applied);
        assert!(pose.heading_rad() > 0.0 && pose.heading_rad() < gps_heading);
    }

    #[test]
    fn test_gps_float_position_policy() {
        let params = LocParams {
            use_gps_float_for_pos: false,
            ..Default::default()
        };
        let mut est = StateEstimator::new(params);

        let mut i = input(0.0);
        i.gps = Some(GpsSample {
            solution: GpsSolution::Float,
            north_m: 3.0,
            east_m: 2.0,
            ground_speed_ms: 0.0,
        });
        let (pose, _, _) = est.compute_pose(&i);

        assert!(pose.position_m.norm() < EPS);
        assert_eq!(est.gps_solution(), GpsSolution::Float);
        assert!(est.last_fix_time_s().is_none());
        assert_eq!(est.last_valid_gps_time_s(), Some(0.0));
    }

    #[test]
    fn test_yaw_rate_filters_approach_raw() {
        let mut est = StateEstimator::default();
        let mut last = 0.0;

        for k in 1..100 {
            let mut i = input(k as f64 * 0.02);
            i.encoders = EncoderDeltas {
                left_ticks: -10,
                right_ticks: 10,
            };
            let (_, speed, _) = est.compute_pose(&i);
            assert!(speed.yaw_rate_wheels_rads >= last);
            assert!(speed.yaw_rate_wheels_rads <= speed.angular_rads + EPS);
            last = speed.yaw_rate_wheels_rads;
        }

        est.reset_motion_filters();
        assert_eq!(est.speed().yaw_rate_wheels_rads, 0.0);
    }
}
