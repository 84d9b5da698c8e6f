//! # Robot context
//!
//! [`RobotContext`] holds everything the operations share: the latest sensor frame, the state
//! estimator, anomaly detector and line tracker, the path generator and a handful of flags that
//! survive operation changes.
//!
//! [`Robot`] owns the context together with the operation manager and runs one control cycle per
//! call to [`Robot::tick`]:
//!
//! 1. Estimate the pose from the new sensor frame
//! 2. Derive robot level events (GPS jump, IMU problems, battery and charger edges, mow stall)
//! 3. Evaluate the anomaly detector while the active operation is monitored
//! 4. Run the active operation
//! 5. Persist the operation state on change and periodically

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::Deserialize;

use comms_if::{eqpt::sensors::SensorFrame, tm::NavTm};
use util::time::Clock;

use crate::{
    auto::{
        detect::{AnomalyDetector, DetectorInput},
        line_tracker::{LineTracker, TrackEvent},
        loc::{EstimatorInput, StateEstimator},
        op_mgr::{ErrorCause, ObstacleCause, OpKind, OpMgr, RetryWindow, RobotEvent},
        path::PathGenerator,
    },
    drive::Drive,
    persist::{PersistError, PersistedState, Storage},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Duration of a [`OpKind::Wait`] if nothing else was requested.
const DEFAULT_WAIT_S: f64 = 1.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State shared between all operations.
pub struct RobotContext {
    /// Time of the current cycle
    pub now_s: f64,

    /// Sensor data polled at the start of the current cycle
    pub frame: SensorFrame,

    pub estimator: StateEstimator,
    pub detector: AnomalyDetector,
    pub tracker: LineTracker,
    pub path: Box<dyn PathGenerator>,

    /// Speed the tracker aims for on open segments
    pub cruise_speed_ms: f64,

    /// Outermost pending goal, kept in sync by the operation manager
    pub goal: OpKind,

    /// The mower was sent to the charger by the operator, so charging doesn't resume mowing
    pub parked_by_operator: bool,

    /// Cause of the most recent escalation to Error
    pub error_cause: Option<ErrorCause>,

    pub requests: DriverRequests,

    /// The IMU must settle before the next Mow or Dock
    pub imu_calibration_pending: bool,

    /// Navigation events raised by the line tracker, dispatched after the active operation runs
    pub track_events: Vec<TrackEvent>,

    /// Escapes inside the sliding window, configured by the manager when it starts
    pub escape_window: RetryWindow,

    /// Duration of the next Wait
    pub wait_s: f64,

    /// Obstacle which caused the most recent escape
    pub last_obstacle: Option<ObstacleCause>,

    /// Times Charge gave up on the contacts and docked again since charging last completed
    pub dock_fallbacks: u32,
}

/// Counters of requests the driver layer services.
///
/// The driver compares them against the last values it saw and acts on any increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverRequests {
    pub gps_reboots: u32,
    pub imu_restarts: u32,
}

/// Robot level parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RobotParams {
    /// Cycle period while moving
    pub control_period_s: f64,

    /// Cycle period in Idle, Charge and Error
    pub idle_period_s: f64,

    /// Interval between periodic saves of the operation state
    pub save_period_s: f64,

    pub cruise_speed_ms: f64,

    /// Minimum interval between two bad charger contact events
    pub bad_contact_interval_s: f64,

    /// Run an IMU calibration before the first Mow or Dock
    pub imu_calibration_on_start: bool,

    /// Time without a valid GPS solution after which the signal counts as lost. Without any
    /// valid solution since start up the mower runs on odometry alone and this never triggers.
    pub gps_no_signal_timeout_s: Option<f64>,
}

/// The navigation core: context, operation manager, clock and persistence.
pub struct Robot {
    pub ctx: RobotContext,
    pub op_mgr: OpMgr,

    params: RobotParams,
    clock: Box<dyn Clock>,
    storage: Box<dyn Storage>,

    edges: EdgeState,

    last_save_s: Option<f64>,
    last_saved_ops: Option<(OpKind, OpKind)>,
}

/// Previous levels of the inputs which raise events on an edge.
#[derive(Debug, Clone, Copy, Default)]
struct EdgeState {
    charger_connected: bool,
    under_voltage: bool,
    should_go_home: bool,
    charging_completed: bool,
    mow_stall: bool,
    imu_tilt: bool,
    gps_no_signal: bool,
    last_bad_contact_s: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for RobotParams {
    fn default() -> Self {
        Self {
            control_period_s: 0.02,
            idle_period_s: 0.1,
            save_period_s: 5.0,
            cruise_speed_ms: 0.3,
            bad_contact_interval_s: 60.0,
            imu_calibration_on_start: true,
            gps_no_signal_timeout_s: Some(30.0),
        }
    }
}

impl RobotContext {
    /// Create a context with default estimator, detector and tracker parameters.
    pub fn new(path: Box<dyn PathGenerator>, params: &RobotParams) -> Self {
        Self {
            now_s: 0.0,
            frame: SensorFrame::default(),
            estimator: StateEstimator::default(),
            detector: AnomalyDetector::default(),
            tracker: LineTracker::default(),
            path,
            cruise_speed_ms: params.cruise_speed_ms,
            goal: OpKind::Idle,
            parked_by_operator: false,
            error_cause: None,
            requests: DriverRequests::default(),
            imu_calibration_pending: params.imu_calibration_on_start,
            track_events: Vec::new(),
            escape_window: RetryWindow::default(),
            wait_s: DEFAULT_WAIT_S,
            last_obstacle: None,
            dock_fallbacks: 0,
        }
    }
}

impl Robot {
    pub fn new(
        ctx: RobotContext,
        op_mgr: OpMgr,
        params: RobotParams,
        clock: Box<dyn Clock>,
        storage: Box<dyn Storage>,
    ) -> Self {
        Self {
            ctx,
            op_mgr,
            params,
            clock,
            storage,
            edges: EdgeState::default(),
            last_save_s: None,
            last_saved_ops: None,
        }
    }

    /// Restore the anomaly counters and GPS jump count from the last saved state.
    ///
    /// The saved operation is only reported, the mower always starts in Idle. Returns `true` if a
    /// state was found.
    pub fn restore(&mut self) -> Result<bool, PersistError> {
        let state = match self.storage.load()? {
            Some(s) => s,
            None => {
                info!("No saved operation state");
                return Ok(false);
            }
        };

        info!(
            "Restored state saved at {:.1} s (was {} with goal {}, {} obstacles)",
            state.saved_at_s, state.op, state.goal, state.counters.obstacles
        );
        if let Some(cause) = state.error_cause {
            warn!("The previous run ended in error: {}", cause);
        }

        self.ctx.detector.set_counters(state.counters);
        self.ctx.estimator.set_gps_jumps(state.gps_jumps);

        Ok(true)
    }

    /// Run one control cycle on the given sensor frame.
    pub fn tick(&mut self, frame: SensorFrame, drive: &mut dyn Drive) {
        let now_s = self.clock.now_s();
        self.ctx.now_s = now_s;
        self.ctx.frame = frame;

        // ---- STATE ESTIMATION ----

        let input = EstimatorInput {
            time_s: now_s,
            encoders: self.ctx.frame.encoders,
            imu_found: self.ctx.frame.imu_found,
            imu: self.ctx.frame.imu,
            gps: self.ctx.frame.gps,
            linear_speed_set_ms: drive.linear_set_ms(),
            angular_speed_set_rads: drive.angular_set_rads(),
        };
        let (pose, speed, gps_jump) = self.ctx.estimator.compute_pose(&input);
        let report = self.ctx.estimator.report();

        // ---- ROBOT EVENTS ----

        let mut events = Vec::new();

        if let Some(jump) = gps_jump {
            debug!("GPS jump of {:.2} m in {:.2} s", jump.distance_m, jump.dt_s);
            events.push(RobotEvent::GpsJump);
        }
        if report.imu_timeout {
            self.ctx.requests.imu_restarts += 1;
            events.push(RobotEvent::ImuError);
        }
        if rising(&mut self.edges.imu_tilt, report.imu_tilt) {
            events.push(RobotEvent::ImuTilt);
        }
        let gps_lost = self.gps_lost(now_s);
        if rising(&mut self.edges.gps_no_signal, gps_lost) {
            events.push(RobotEvent::GpsNoSignal);
        }

        self.battery_events(now_s, &mut events);

        if rising(&mut self.edges.mow_stall, drive.status().mow_stall) {
            events.push(RobotEvent::MowStall);
        }

        for event in events.iter() {
            self.op_mgr.handle_event(&mut self.ctx, drive, event);
        }

        // ---- ANOMALY DETECTION ----

        let input = DetectorInput {
            pose,
            speed,
            linear_set_ms: drive.linear_set_ms(),
            angular_set_rads: drive.angular_set_rads(),
            bumper: self.ctx.frame.bumper,
            sonar: self.ctx.frame.sonar,
            lift: self.ctx.frame.lift,
            drive: drive.status(),
            imu_found: self.ctx.frame.imu_found,
            monitoring: self.op_mgr.active().monitors_anomalies(),
        };
        let anomaly = self
            .ctx
            .detector
            .evaluate(&input, now_s, self.ctx.path.as_mut());

        if let Some(anomaly) = anomaly {
            self.op_mgr
                .handle_event(&mut self.ctx, drive, &RobotEvent::Anomaly(anomaly));
        }

        // ---- OPERATION ----

        self.op_mgr.run(&mut self.ctx, drive);

        // ---- PERSISTENCE ----

        self.persist(now_s);
    }

    /// Period of the next cycle, slower while resting.
    pub fn cycle_period_s(&self) -> f64 {
        if self.op_mgr.active().is_resting() {
            self.params.idle_period_s
        } else {
            self.params.control_period_s
        }
    }

    pub fn get_tm(&self) -> NavTm {
        let pose = self.ctx.estimator.pose();

        NavTm {
            op: self.op_mgr.active().to_string(),
            goal: self.op_mgr.goal().to_string(),
            chain: self.op_mgr.chain_string(),
            x_m: pose.x_m(),
            y_m: pose.y_m(),
            heading_rad: pose.heading_rad(),
            gps_solution: self.ctx.estimator.gps_solution(),
            gps_jumps: self.ctx.estimator.gps_jumps(),
            error_cause: self
                .ctx
                .error_cause
                .map(|c| c.to_string())
                .unwrap_or_else(|| String::from("None")),
            counters: self.ctx.detector.counters(),
            transitions: self.op_mgr.transitions(),
        }
    }

    pub fn params(&self) -> &RobotParams {
        &self.params
    }

    /// A valid GPS solution was seen before but not within the timeout.
    fn gps_lost(&self, now_s: f64) -> bool {
        match (
            self.params.gps_no_signal_timeout_s,
            self.ctx.estimator.last_valid_gps_time_s(),
        ) {
            (Some(timeout_s), Some(last_s)) => now_s - last_s > timeout_s,
            _ => false,
        }
    }

    fn battery_events(&mut self, now_s: f64, events: &mut Vec<RobotEvent>) {
        let battery = self.ctx.frame.battery;
        let edges = &mut self.edges;

        if battery.charger_connected != edges.charger_connected {
            edges.charger_connected = battery.charger_connected;
            events.push(if battery.charger_connected {
                RobotEvent::ChargerConnected
            } else {
                RobotEvent::ChargerDisconnected
            });
        }

        if battery.bad_charger_contact {
            let due = edges
                .last_bad_contact_s
                .map_or(true, |t| now_s - t >= self.params.bad_contact_interval_s);
            if due {
                edges.last_bad_contact_s = Some(now_s);
                events.push(RobotEvent::BadChargingContact);
            }
        }

        if rising(&mut edges.under_voltage, battery.under_voltage) {
            events.push(RobotEvent::BatteryUndervoltage);
        }
        if rising(&mut edges.should_go_home, battery.should_go_home) {
            events.push(RobotEvent::BatteryLowShouldDock);
        }
        if rising(&mut edges.charging_completed, battery.charging_completed) {
            events.push(RobotEvent::ChargingCompleted);
        }
    }

    fn persist(&mut self, now_s: f64) {
        let ops = (self.op_mgr.active(), self.op_mgr.goal());

        let changed = self.last_saved_ops != Some(ops);
        let due = self
            .last_save_s
            .map_or(true, |t| now_s - t >= self.params.save_period_s);

        if !changed && !due {
            return;
        }

        self.storage.save(&PersistedState {
            op: ops.0,
            goal: ops.1,
            error_cause: self.ctx.error_cause,
            counters: self.ctx.detector.counters(),
            gps_jumps: self.ctx.estimator.gps_jumps(),
            saved_at_s: now_s,
        });

        self.last_saved_ops = Some(ops);
        self.last_save_s = Some(now_s);
    }
}

/// Store the new level and return true on a rising edge.
fn rising(last: &mut bool, level: bool) -> bool {
    let edge = level && !*last;
    *last = level;
    edge
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use comms_if::{
        eqpt::sensors::{GpsSample, GpsSolution},
        tm::AnomalyCounters,
    };
    use nalgebra::Vector2;
    use util::time::FakeClock;

    use super::*;
    use crate::{
        auto::{
            detect::DetectParams,
            loc::Pose,
            op_mgr::{OpMgrParams, OpType},
            path::WaypointPath,
        },
        drive::mock::RecordingDrive,
        persist::MemStorage,
    };

    struct Scenario {
        robot: Robot,
        clock: FakeClock,
        drive: RecordingDrive,
        storage: MemStorage,
    }

    impl Scenario {
        /// A robot at the given pose on an eastbound route, with the dock path to the west and
        /// the GPS based motion checks off, since the recording drive never moves.
        fn new(pose: Pose) -> Self {
            let path = WaypointPath::new(
                vec![Vector2::new(5.0, 0.0), Vector2::new(10.0, 0.0)],
                vec![
                    Vector2::new(-1.0, 0.0),
                    Vector2::new(-2.0, 0.0),
                    Vector2::new(-3.0, 0.0),
                ],
            );

            let params = RobotParams {
                imu_calibration_on_start: false,
                ..Default::default()
            };

            let mut ctx = RobotContext::new(Box::new(path), &params);
            ctx.detector = AnomalyDetector::new(DetectParams {
                gps_speed_detection: false,
                gps_motion_detection: false,
                ..Default::default()
            });
            ctx.estimator.set_pose(pose);

            let clock = FakeClock::new(0.0);
            let storage = MemStorage::new();

            let robot = Robot::new(
                ctx,
                OpMgr::new(OpMgrParams::default()),
                params,
                Box::new(clock.clone()),
                Box::new(storage.clone()),
            );

            Self {
                robot,
                clock,
                drive: RecordingDrive::default(),
                storage,
            }
        }

        /// A frame with a fixed GPS solution at the current pose.
        fn frame(&self) -> SensorFrame {
            let pose = self.robot.ctx.estimator.pose();
            SensorFrame {
                gps: Some(GpsSample {
                    solution: GpsSolution::Fixed,
                    north_m: pose.y_m(),
                    east_m: pose.x_m(),
                    ground_speed_ms: 0.0,
                }),
                ..Default::default()
            }
        }

        fn tick(&mut self, frame: SensorFrame, dt_s: f64) {
            self.clock.advance(dt_s);
            self.robot.tick(frame, &mut self.drive);
        }

        fn set(&mut self, op: OpType) {
            self.robot
                .op_mgr
                .set_operation(&mut self.robot.ctx, &mut self.drive, op, false);
        }

        fn active(&self) -> OpKind {
            self.robot.op_mgr.active()
        }
    }

    #[test]
    fn test_bumper_escape_and_resume() {
        let mut s = Scenario::new(Pose::new(0.0, 0.0, 0.0));
        s.set(OpType::Mow);

        let f = s.frame();
        s.tick(f, 0.02);
        assert_eq!(s.active(), OpKind::Mow);
        assert!(s.drive.linear_ms > 0.05);

        let mut f = s.frame();
        f.bumper.left = true;
        s.tick(f, 0.02);
        assert_eq!(s.active(), OpKind::EscapeReverse);
        assert_eq!(s.robot.op_mgr.chain_string(), "EscapeReverse->Mow");
        assert_eq!(s.robot.ctx.detector.counters().bumper, 1);

        for _ in 0..300 {
            let f = s.frame();
            s.tick(f, 0.02);
        }

        // Left bumper, so the turn is clockwise
        let sequence = [(0.0, 0.0), (-0.1, 0.0), (0.0, -0.5)];
        assert!(s.drive.commands.windows(3).any(|w| w == sequence));

        assert_eq!(s.active(), OpKind::Mow);
        assert!(s.drive.linear_ms > 0.05);
        assert_eq!(s.robot.get_tm().chain, "Mow");
    }

    #[test]
    fn test_dock_fails_three_times() {
        let mut s = Scenario::new(Pose::new(0.0, 0.0, std::f64::consts::PI));
        s.set(OpType::Dock);

        for _ in 0..3000 {
            let mut f = s.frame();
            f.bumper.left = s.active() == OpKind::Dock && s.drive.linear_ms.abs() >= 0.05;
            s.tick(f, 0.02);

            if s.active() == OpKind::Error {
                break;
            }
        }

        assert_eq!(s.active(), OpKind::Error);
        assert_eq!(s.robot.ctx.error_cause, Some(ErrorCause::DockFailed));
        assert_eq!(s.robot.ctx.detector.counters().bumper, 3);
        assert_eq!(s.robot.get_tm().error_cause, "docking failed");
    }

    #[test]
    fn test_charger_connect_changes_once() {
        let mut s = Scenario::new(Pose::new(-3.0, 0.0, 0.0));

        for _ in 0..50 {
            let mut f = s.frame();
            f.battery.charger_connected = true;
            s.tick(f, 0.1);
        }

        assert_eq!(s.active(), OpKind::Charge);
        assert_eq!(s.robot.op_mgr.transitions(), 1);
        assert_eq!(s.robot.cycle_period_s(), s.robot.params().idle_period_s);
    }

    #[test]
    fn test_battery_edges() {
        let mut s = Scenario::new(Pose::new(0.0, 0.0, 0.0));
        s.set(OpType::Mow);

        // Held low battery only sends the mower home once
        for _ in 0..10 {
            let mut f = s.frame();
            f.battery.should_go_home = true;
            s.tick(f, 0.02);
        }
        assert_eq!(s.active(), OpKind::Dock);
        assert_eq!(s.robot.op_mgr.transitions(), 2);
    }

    #[test]
    fn test_gps_no_signal_after_timeout() {
        let mut s = Scenario::new(Pose::new(0.0, 0.0, 0.0));
        s.set(OpType::Mow);

        let f = s.frame();
        s.tick(f, 0.1);

        // The receiver goes silent at 0.1 s
        let mut lost_at_s = None;
        for i in 1..=80 {
            s.tick(SensorFrame::default(), 0.5);
            if lost_at_s.is_none() && s.active() == OpKind::GpsWaitFloat {
                lost_at_s = Some(0.1 + 0.5 * i as f64);
            }
        }

        let lost_at_s = lost_at_s.unwrap();
        assert!(lost_at_s > 30.1 && lost_at_s < 31.0, "lost at {}", lost_at_s);
    }

    #[test]
    fn test_persistence_cadence() {
        let mut s = Scenario::new(Pose::new(0.0, 0.0, 0.0));

        // Saved on the first cycle, then every five seconds
        for _ in 0..120 {
            let f = s.frame();
            s.tick(f, 0.1);
        }
        let saved = s.storage.saved();
        assert_eq!(saved.len(), 3);
        assert!(saved.iter().all(|st| st.op == OpKind::Idle));

        // And on every operation change
        s.set(OpType::Mow);
        let f = s.frame();
        s.tick(f, 0.02);

        let saved = s.storage.saved();
        assert_eq!(saved.len(), 4);
        assert_eq!(saved[3].op, OpKind::Mow);
        assert_eq!(saved[3].goal, OpKind::Mow);
    }

    #[test]
    fn test_restore() {
        let mut s = Scenario::new(Pose::new(0.0, 0.0, 0.0));
        assert!(!s.robot.restore().unwrap());

        s.storage.clone().save(&PersistedState {
            op: OpKind::Mow,
            goal: OpKind::Mow,
            error_cause: None,
            counters: AnomalyCounters {
                bumper: 4,
                obstacles: 4,
                ..Default::default()
            },
            gps_jumps: 2,
            saved_at_s: 100.0,
        });

        assert!(s.robot.restore().unwrap());
        assert_eq!(s.robot.ctx.detector.counters().bumper, 4);
        assert_eq!(s.robot.ctx.estimator.gps_jumps(), 2);

        let f = s.frame();
        s.tick(f, 0.1);
        assert_eq!(s.active(), OpKind::Idle);
    }
}
