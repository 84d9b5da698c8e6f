//! Line tracker module state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{convert::Infallible, f64::consts::PI, fmt::Display};

use log::{debug, info, warn};
use nalgebra::Vector2;
use serde::Serialize;

use comms_if::eqpt::{drive::DriveStatus, sensors::GpsSolution};
use util::{maths::ang_dist, module::State, params, session::Session};

use super::{controllers::*, Params};
use crate::auto::{
    loc::Pose,
    path::{PathGenerator, WayMode, WaypointPair},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Line tracker.
#[derive(Debug, Clone)]
pub struct LineTracker {
    params: Params,

    /// Executing mode
    mode: TrackMode,

    /// The last rotation on the spot has settled
    precise: bool,

    kidnapped: bool,

    /// Start of the straight dock approach
    dock_timer_start_s: Option<f64>,

    /// Start of the straight departure from the dock
    undock_timer_start_s: Option<f64>,

    /// Start of the fix timeout window, the first cycle after a reset
    fix_reference_s: Option<f64>,

    speed_limit: Option<SpeedLimit>,

    /// The segment after the last reached waypoint continues straight ahead
    straight: bool,
    was_straight: bool,

    report: StatusReport,
}

/// Path generator state sampled at the start of a cycle.
#[derive(Debug, Clone, Default)]
pub struct PathSnapshot {
    pub pair: WaypointPair,
    pub dist_target_m: f64,
    pub dist_last_target_m: f64,
    pub way_mode: Option<WayMode>,
    pub is_docking: bool,
    pub is_undocking: bool,
    pub at_dock_path: bool,
    pub going_to_dock_path: bool,
    pub targeting_last_dock_point: bool,
    pub between_last_dock_points: bool,
    pub track_slow: bool,
    pub track_reverse: bool,
    pub should_gps_reboot: bool,
    pub at_gps_reboot_point: bool,
    pub dock_position: Option<Vector2<f64>>,
}

/// Robot conditions the tracker adapts to.
#[derive(Debug, Clone, Default)]
pub struct TrackPolicy {
    /// Requested cruise speed
    pub cruise_speed_ms: f64,

    pub gps_solution: GpsSolution,
    pub last_fix_time_s: Option<f64>,

    /// The sonar sees something close, but not close enough to be an obstacle
    pub sonar_near: bool,

    pub drive: DriveStatus,

    /// Linear speed currently commanded to the drive
    pub linear_set_ms: f64,

    /// Angular speed currently commanded to the drive
    pub angular_set_rads: f64,

    pub lift: bool,

    /// The mower is heading home, the mow motor stays off
    pub docking_goal: bool,
}

/// Input data for one tracker cycle.
#[derive(Debug, Clone, Default)]
pub struct TrackInput {
    pub pose: Pose,
    pub now_s: f64,
    pub path: PathSnapshot,
    pub policy: TrackPolicy,
}

/// Velocity demand and events produced by one tracker cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackOutput {
    pub linear_ms: f64,
    pub angular_rads: f64,
    pub mow_enable: bool,

    /// The target was reached this cycle, evaluated after the velocity demand
    pub target_reached: bool,

    /// A rotation on the spot settled, the yaw rate filters should be reset
    pub reset_filters: bool,

    pub events: Vec<TrackEvent>,
}

/// The status report containing the tracking errors.
#[derive(Debug, Default, Copy, Clone, Serialize)]
pub struct StatusReport {
    pub mode: TrackMode,

    /// Heading error to the target, positive to the left
    pub heading_err_rad: f64,

    /// Lateral error to the line, positive to the right
    pub lat_err_m: f64,

    /// Distance to the segment
    pub dist_to_path_m: f64,

    pub dist_target_m: f64,

    /// Speed limit in force while tracking
    pub speed_limit: Option<SpeedLimit>,

    pub angle_fits: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Potential errors that can occur during processing of the module.
#[derive(Debug, thiserror::Error)]
pub enum LineTrackerError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(params::LoadError),
}

/// The possible modes of execution of the tracker. Each mode is handled by a `mode_xyz`
/// function.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum TrackMode {
    /// Rotating on the spot towards the target
    Rotate,

    /// Following the line
    Track,
}

/// Conditions limiting the linear speed while tracking.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum SpeedLimit {
    Float,
    NearWaypoint,
    Sonar,
    Overload,
    KeepSlow,
    RetrySlow,
    TrackSlow,
    DockNoRotation,
    DockPath,
    Dock,
}

/// Navigation events for the active operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum TrackEvent {
    TargetReached,
    NoFurtherWaypoints,

    /// No FIXED solution for longer than the fix timeout
    GpsFixTimeout,

    /// The mower left, `true`, or returned to, `false`, the tolerated corridor around the path
    Kidnapped(bool),

    /// The GPS reboot point on the dock path was reached
    DockGpsReboot,

    /// The charging contact was not reached in time
    DockApproachTimeout,

    /// The straight departure from the dock took too long
    UndockTimeout,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl State for LineTracker {
    type InitData = &'static str;
    type InitError = LineTrackerError;

    type InputData = TrackInput;
    type OutputData = TrackOutput;
    type StatusReport = StatusReport;
    type ProcError = Infallible;

    /// Initialise the tracker.
    ///
    /// Expected init data is a path to the parameter file.
    fn init(&mut self, init_data: Self::InitData, _session: &Session) -> Result<(), Self::InitError> {
        let params = params::load(init_data).map_err(LineTrackerError::ParamLoadError)?;
        *self = Self::new(params);
        Ok(())
    }

    /// Compute the velocity demand for the sampled path state.
    ///
    /// Waypoints are not advanced here, see [`LineTracker::track`].
    fn proc(&mut self, input: &TrackInput) -> Result<(TrackOutput, StatusReport), Infallible> {
        let out = self.compute(input);
        Ok((out, self.report))
    }
}

impl Default for LineTracker {
    fn default() -> Self {
        Self::new(Params::default())
    }
}

impl LineTracker {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            mode: TrackMode::Track,
            precise: true,
            kidnapped: false,
            dock_timer_start_s: None,
            undock_timer_start_s: None,
            fix_reference_s: None,
            speed_limit: None,
            straight: false,
            was_straight: false,
            report: StatusReport::default(),
        }
    }

    /// Run one tracking cycle against the path generator.
    ///
    /// The velocity demand is computed first. Only then is the target checked, and on arrival the
    /// path generator is advanced to the next waypoint.
    pub fn track(
        &mut self,
        pose: &Pose,
        policy: &TrackPolicy,
        now_s: f64,
        path: &mut dyn PathGenerator,
    ) -> TrackOutput {
        let input = TrackInput {
            pose: *pose,
            now_s,
            path: PathSnapshot::from_generator(&*path, pose),
            policy: policy.clone(),
        };

        let mut out = self.compute(&input);

        if out.events.contains(&TrackEvent::UndockTimeout) {
            // Give up on the straight departure and carry on from the next dock point
            path.advance_to_next(pose);
        }

        if out.target_reached {
            out.events.push(TrackEvent::TargetReached);
            self.straight = path.next_point_is_straight();

            if !path.advance_to_next(pose) {
                out.events.push(TrackEvent::NoFurtherWaypoints);
            }
        }

        out
    }

    /// Clear all per-route state, called when a new route starts.
    pub fn reset(&mut self) {
        self.mode = TrackMode::Track;
        self.precise = true;
        self.kidnapped = false;
        self.dock_timer_start_s = None;
        self.undock_timer_start_s = None;
        self.fix_reference_s = None;
        self.speed_limit = None;
        self.straight = false;
        self.was_straight = false;
    }

    pub fn report(&self) -> StatusReport {
        self.report
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn is_kidnapped(&self) -> bool {
        self.kidnapped
    }

    fn compute(&mut self, input: &TrackInput) -> TrackOutput {
        let pos = input.pose.position_m;
        let pair = &input.path.pair;

        let to_target = pair.target - pos;
        let mut target_heading_rad = to_target[1].atan2(to_target[0]);
        if input.path.track_reverse {
            target_heading_rad += PI;
        }

        let heading_err_rad = ang_dist(input.pose.heading_rad(), target_heading_rad);
        let lat_err_m = lateral_error(pair, &pos);
        let dist_to_path_m = distance_to_segment(pair, &pos);
        let dist_target_m = input.path.dist_target_m;

        let angle_fits = self.angle_fits(heading_err_rad, &input.path, dist_to_path_m);

        let mode = if angle_fits {
            TrackMode::Track
        } else {
            TrackMode::Rotate
        };
        if mode != self.mode {
            debug!("LineTracker mode change to: {}", mode);
            self.mode = mode;
        }

        let mut out = TrackOutput::default();

        match self.mode {
            TrackMode::Rotate => self.mode_rotate(input, heading_err_rad, &mut out),
            TrackMode::Track => self.mode_track(input, heading_err_rad, lat_err_m, &mut out),
        }

        self.gps_conditions(input, dist_to_path_m, &mut out);

        out.target_reached = dist_target_m < self.params.target_reached_tolerance_m;
        self.dock_overrides(input, &mut out);

        out.mow_enable = input.path.way_mode == Some(WayMode::Mow) && !input.policy.docking_goal;

        if input.policy.lift {
            out.mow_enable = false;
            out.linear_ms = 0.0;
            out.angular_rads = 0.0;
        }

        self.report = StatusReport {
            mode: self.mode,
            heading_err_rad,
            lat_err_m,
            dist_to_path_m,
            dist_target_m,
            speed_limit: self.speed_limit,
            angle_fits,
        };

        out
    }

    /// Decide whether the heading is close enough to the target to track rather than rotate.
    ///
    /// Near a waypoint, or far from the path, the tighter transition angle applies. Mid-segment a
    /// wider angle is tolerated so that small GPS corrections don't stop the mower.
    fn angle_fits(&self, heading_err_rad: f64, path: &PathSnapshot, dist_to_path_m: f64) -> bool {
        if self.dock_timer_start_s.is_some() || self.undock_timer_start_s.is_some() {
            return true;
        }

        let p = &self.params;
        let err = heading_err_rad.abs();

        let tight = path.dist_target_m < p.waypoint_rotate_dist_m
            || path.dist_last_target_m < p.waypoint_rotate_dist_m
            || dist_to_path_m > p.off_path_dist_m;

        let fits = if tight {
            err <= p.transition_angle_rad
        } else {
            err < p.mid_segment_fit_angle_rad
        };

        fits && self.precise
    }

    fn mode_rotate(&mut self, input: &TrackInput, heading_err_rad: f64, out: &mut TrackOutput) {
        self.precise = false;

        let speed = rotation_speed(&self.params, heading_err_rad);
        out.linear_ms = 0.0;
        out.angular_rads = if heading_err_rad < 0.0 { -speed } else { speed };

        if heading_err_rad.abs() < self.params.angle_precise_rad {
            out.angular_rads = 0.0;
            out.reset_filters = true;

            // Only settled once the drive has actually stopped turning
            if input.policy.angular_set_rads == 0.0 {
                self.precise = true;
            }
        }

        // Still decelerating from the last segment
        if input.policy.linear_set_ms.abs() > 0.0 {
            out.angular_rads = 0.0;
        }
    }

    fn mode_track(
        &mut self,
        input: &TrackInput,
        heading_err_rad: f64,
        lat_err_m: f64,
        out: &mut TrackOutput,
    ) {
        let p = &self.params;
        let path = &input.path;
        let policy = &input.policy;

        let (mut linear_ms, limit) = self.speed_ceiling(input);
        if limit != self.speed_limit {
            match limit {
                Some(l) => debug!("Speed limited by {}: {:.2} m/s", l, linear_ms),
                None => debug!("Speed unlimited: {:.2} m/s", linear_ms),
            }
            self.speed_limit = limit;
        }

        if p.distance_ramp
            && (path.dist_target_m < 2.0 * p.near_waypoint_dist_m
                || path.dist_last_target_m < 2.0 * p.near_waypoint_dist_m)
        {
            linear_ms = distance_ramp(
                p,
                linear_ms,
                policy.cruise_speed_ms,
                path.dist_target_m,
                path.dist_last_target_m,
                self.straight,
                &mut self.was_straight,
            );
        }

        if path.track_reverse {
            linear_ms = -linear_ms;
        }

        let gains = stanley_gains(p, policy.gps_solution, path.track_slow, policy.linear_set_ms);

        out.linear_ms = linear_ms;
        out.angular_rads = stanley(
            gains,
            heading_err_rad,
            lat_err_m,
            policy.linear_set_ms,
            p.max_steering_rad,
        );
    }

    /// The lowest speed of all active limits and the cruise speed.
    fn speed_ceiling(&self, input: &TrackInput) -> (f64, Option<SpeedLimit>) {
        let p = &self.params;
        let path = &input.path;
        let policy = &input.policy;

        let near_waypoint = !p.distance_ramp
            && (path.dist_target_m < p.near_waypoint_dist_m
                || path.dist_last_target_m < p.near_waypoint_dist_m);

        let active = [
            (policy.gps_solution == GpsSolution::Float, SpeedLimit::Float),
            (near_waypoint, SpeedLimit::NearWaypoint),
            (policy.sonar_near, SpeedLimit::Sonar),
            (policy.drive.overload, SpeedLimit::Overload),
            (policy.drive.keep_slow, SpeedLimit::KeepSlow),
            (policy.drive.retry_slow, SpeedLimit::RetrySlow),
            (path.track_slow, SpeedLimit::TrackSlow),
            (
                self.dock_timer_start_s.is_some() || self.undock_timer_start_s.is_some(),
                SpeedLimit::DockNoRotation,
            ),
            (path.at_dock_path, SpeedLimit::DockPath),
            (path.going_to_dock_path, SpeedLimit::Dock),
        ];

        active
            .iter()
            .filter(|(on, _)| *on)
            .fold((policy.cruise_speed_ms, None), |(speed, limit), (_, l)| {
                let s = l.speed_ms(p);
                if s < speed {
                    (s, Some(*l))
                } else {
                    (speed, limit)
                }
            })
    }

    fn gps_conditions(&mut self, input: &TrackInput, dist_to_path_m: f64, out: &mut TrackOutput) {
        let p = &self.params;
        let path = &input.path;

        if let Some(timeout_s) = p.fix_timeout_s {
            let reference_s = *self.fix_reference_s.get_or_insert(input.now_s);
            let last_fix_s = input.policy.last_fix_time_s.map_or(reference_s, |t| t.max(reference_s));

            if input.now_s > last_fix_s + timeout_s {
                out.events.push(TrackEvent::GpsFixTimeout);
            }
        }

        if p.dock_gps_reboot && path.should_gps_reboot && path.at_gps_reboot_point {
            out.events.push(TrackEvent::DockGpsReboot);
        }

        if p.kidnap_detect {
            let near_dock = (path.is_docking || path.is_undocking)
                && path
                    .dock_position
                    .map_or(false, |d| (d - input.pose.position_m).norm() < p.kidnap_dock_dist_m);

            let tolerance_m = if near_dock {
                p.kidnap_path_tolerance_dock_m
            } else {
                p.kidnap_path_tolerance_m
            };

            if dist_to_path_m > tolerance_m {
                if !self.kidnapped {
                    warn!(
                        "Mower is {:.2} m from the path (tolerance {:.2} m), assuming kidnapped",
                        dist_to_path_m, tolerance_m
                    );
                    self.kidnapped = true;
                    out.events.push(TrackEvent::Kidnapped(true));
                }
            } else if self.kidnapped {
                info!("Mower back on the path");
                self.kidnapped = false;
                out.events.push(TrackEvent::Kidnapped(false));
            }
        }
    }

    /// Force a straight approach to, and departure from, the charging contact.
    fn dock_overrides(&mut self, input: &TrackInput, out: &mut TrackOutput) {
        let p = &self.params;
        let path = &input.path;
        let now_s = input.now_s;

        if !p.dock_no_rotation || path.way_mode != Some(WayMode::Dock) {
            self.dock_timer_start_s = None;
            self.undock_timer_start_s = None;
            return;
        }

        if path.targeting_last_dock_point && !path.is_undocking {
            let start_s = *self.dock_timer_start_s.get_or_insert_with(|| {
                info!("Straight dock approach started, rotation disabled");
                now_s
            });

            if path.dist_last_target_m > p.dock_no_rotation_dist_m {
                out.angular_rads = 0.0;
                out.linear_ms = p.dock_no_rotation_speed_ms;
                out.target_reached = false;
            }

            if now_s > start_s + p.dock_no_rotation_timeout_s {
                warn!("Charging contact not reached in time");
                self.dock_timer_start_s = None;
                out.events.push(TrackEvent::DockApproachTimeout);
            }
        } else {
            self.dock_timer_start_s = None;
        }

        if path.between_last_dock_points && path.is_undocking {
            let start_s = *self.undock_timer_start_s.get_or_insert_with(|| {
                info!("Straight dock departure started, rotation disabled");
                now_s
            });

            out.angular_rads = 0.0;
            out.linear_ms = -p.dock_no_rotation_speed_ms;

            if now_s > start_s + p.dock_no_rotation_timeout_s {
                warn!("Straight dock departure timed out");
                self.undock_timer_start_s = None;
                out.events.push(TrackEvent::UndockTimeout);
            }
        } else {
            self.undock_timer_start_s = None;
        }
    }
}

impl PathSnapshot {
    /// Sample the path generator for the given pose.
    pub fn from_generator(path: &dyn PathGenerator, pose: &Pose) -> Self {
        Self {
            pair: path.get_target_pair(),
            dist_target_m: path.distance_to_target(pose),
            dist_last_target_m: path.distance_to_last_target(pose),
            way_mode: Some(path.way_mode()),
            is_docking: path.is_docking(),
            is_undocking: path.is_undocking(),
            at_dock_path: path.is_at_dock_path(),
            going_to_dock_path: path.going_to_dock_path(),
            targeting_last_dock_point: path.targeting_last_dock_point(),
            between_last_dock_points: path.between_last_dock_points(),
            track_slow: path.track_slow(),
            track_reverse: path.track_reverse(),
            should_gps_reboot: path.should_gps_reboot(),
            at_gps_reboot_point: path.at_gps_reboot_point(),
            dock_position: path.dock_position(),
        }
    }
}

impl SpeedLimit {
    pub fn speed_ms(&self, params: &Params) -> f64 {
        match self {
            SpeedLimit::Float => params.float_speed_ms,
            SpeedLimit::NearWaypoint => params.near_waypoint_speed_ms,
            SpeedLimit::Sonar => params.sonar_speed_ms,
            SpeedLimit::Overload => params.overload_speed_ms,
            SpeedLimit::KeepSlow => params.keep_slow_speed_ms,
            SpeedLimit::RetrySlow => params.retry_slow_speed_ms,
            SpeedLimit::TrackSlow => params.track_slow_speed_ms,
            SpeedLimit::DockNoRotation => params.dock_no_rotation_speed_ms,
            SpeedLimit::DockPath => params.dock_path_speed_ms,
            SpeedLimit::Dock => params.dock_speed_ms,
        }
    }
}

impl Default for TrackMode {
    fn default() -> Self {
        TrackMode::Track
    }
}

impl Display for TrackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackMode::Rotate => write!(f, "TrackMode::Rotate"),
            TrackMode::Track => write!(f, "TrackMode::Track"),
        }
    }
}

impl Display for SpeedLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpeedLimit::Float => "GPS float",
            SpeedLimit::NearWaypoint => "near waypoint",
            SpeedLimit::Sonar => "sonar",
            SpeedLimit::Overload => "overload",
            SpeedLimit::KeepSlow => "keep slow",
            SpeedLimit::RetrySlow => "retry slow",
            SpeedLimit::TrackSlow => "slow zone",
            SpeedLimit::DockNoRotation => "straight dock approach",
            SpeedLimit::DockPath => "dock path",
            SpeedLimit::Dock => "way to dock",
        };
        write!(f, "{}", name)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::auto::path::WaypointPath;
    use std::f64::consts::FRAC_PI_2;

    const CRUISE: f64 = 0.3;

    fn policy() -> TrackPolicy {
        TrackPolicy {
            cruise_speed_ms: CRUISE,
            gps_solution: GpsSolution::Fixed,
            last_fix_time_s: Some(0.0),
            linear_set_ms: CRUISE,
            ..Default::default()
        }
    }

    fn input(pose: Pose, last: (f64, f64), target: (f64, f64)) -> TrackInput {
        let pair = WaypointPair {
            last_target: Vector2::new(last.0, last.1),
            target: Vector2::new(target.0, target.1),
        };

        TrackInput {
            pose,
            now_s: 0.0,
            path: PathSnapshot {
                pair,
                dist_target_m: pose.distance_to(&pair.target),
                dist_last_target_m: pose.distance_to(&pair.last_target),
                way_mode: Some(WayMode::Mow),
                ..Default::default()
            },
            policy: policy(),
        }
    }

    #[test]
    fn test_straight_ahead() {
        let mut lt = LineTracker::default();
        let i = input(Pose::new(0.0, 0.0, 0.0), (-1.0, 0.0), (10.0, 0.0));

        let (out, report) = lt.proc(&i).unwrap();

        assert_eq!(report.mode, TrackMode::Track);
        assert!(out.angular_rads.abs() < 1e-12);
        assert!((out.linear_ms - CRUISE).abs() < 1e-12);
        assert!(out.mow_enable);
        assert!(!out.target_reached);
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_rotate_towards_target() {
        let mut lt = LineTracker::default();

        // Target 90 degrees to the left
        let mut i = input(Pose::new(0.0, 0.0, 0.0), (0.0, -1.0), (0.0, 10.0));
        i.policy.linear_set_ms = 0.0;
        let (out, report) = lt.proc(&i).unwrap();

        assert_eq!(report.mode, TrackMode::Rotate);
        assert_eq!(out.linear_ms, 0.0);
        assert!(out.angular_rads > 0.0);

        // And to the right
        let mut lt = LineTracker::default();
        let mut i = input(Pose::new(0.0, 0.0, FRAC_PI_2), (-1.0, 0.0), (10.0, 0.0));
        i.policy.linear_set_ms = 0.0;
        let (out, _) = lt.proc(&i).unwrap();
        assert!(out.angular_rads < 0.0);
    }

    #[test]
    fn test_rotation_waits_for_deceleration() {
        let mut lt = LineTracker::default();

        let i = input(Pose::new(0.0, 0.0, 0.0), (0.0, -1.0), (0.0, 10.0));
        let (out, report) = lt.proc(&i).unwrap();

        assert_eq!(report.mode, TrackMode::Rotate);
        assert_eq!(out.linear_ms, 0.0);
        assert_eq!(out.angular_rads, 0.0);
    }

    #[test]
    fn test_rotation_settles_once_drive_stopped() {
        let mut lt = LineTracker::default();

        let mut i = input(Pose::new(0.0, 0.0, 0.0), (0.0, -1.0), (0.0, 10.0));
        i.policy.linear_set_ms = 0.0;
        lt.proc(&i).unwrap();

        // Within the precise angle but the drive still turning
        i.pose = Pose::new(0.0, 0.0, FRAC_PI_2 - 0.01);
        i.policy.angular_set_rads = 0.2;
        let (out, report) = lt.proc(&i).unwrap();
        assert_eq!(report.mode, TrackMode::Rotate);
        assert_eq!(out.angular_rads, 0.0);
        assert!(out.reset_filters);

        // Drive stopped, settles and tracks next cycle
        i.policy.angular_set_rads = 0.0;
        lt.proc(&i).unwrap();
        let (_, report) = lt.proc(&i).unwrap();
        assert_eq!(report.mode, TrackMode::Track);
    }

    #[test]
    fn test_target_reached_tolerance() {
        let tol = Params::default().target_reached_tolerance_m;
        let mut lt = LineTracker::default();

        let i = input(Pose::new(10.0 - tol + 1e-3, 0.0, 0.0), (0.0, 0.0), (10.0, 0.0));
        assert!(lt.proc(&i).unwrap().0.target_reached);

        let i = input(Pose::new(10.0 - tol - 1e-3, 0.0, 0.0), (0.0, 0.0), (10.0, 0.0));
        assert!(!lt.proc(&i).unwrap().0.target_reached);
    }

    #[test]
    fn test_track_advances_path() {
        let mut lt = LineTracker::default();
        let mut path = WaypointPath::new(vec![Vector2::new(1.0, 0.0), Vector2::new(2.0, 0.0)], vec![]);
        let start = Pose::new(0.0, 0.0, 0.0);
        path.start_mowing(&start);

        let out = lt.track(&Pose::new(0.95, 0.0, 0.0), &policy(), 0.0, &mut path);
        assert_eq!(out.events, vec![TrackEvent::TargetReached]);
        assert!(!out.mow_enable);
        assert_eq!(path.get_target_pair().target, Vector2::new(2.0, 0.0));

        let out = lt.track(&Pose::new(1.95, 0.0, 0.0), &policy(), 0.0, &mut path);
        assert!(out.mow_enable);
        assert_eq!(
            out.events,
            vec![TrackEvent::TargetReached, TrackEvent::NoFurtherWaypoints]
        );
    }

    #[test]
    fn test_degenerate_segment_angular_only() {
        let mut lt = LineTracker::default();

        let mut i = input(Pose::new(0.0, 0.0, 0.0), (5.0, 0.1), (5.0, 0.1));
        i.path.dist_last_target_m = i.path.dist_target_m;
        let (out, report) = lt.proc(&i).unwrap();

        assert_eq!(report.lat_err_m, 0.0);
        assert_eq!(report.mode, TrackMode::Track);
        assert!(out.angular_rads > 0.0);
    }

    #[test]
    fn test_speed_limits() {
        let mut lt = LineTracker::default();
        let params = Params::default();

        let mut i = input(Pose::new(0.0, 0.0, 0.0), (-5.0, 0.0), (5.0, 0.0));
        i.policy.gps_solution = GpsSolution::Float;
        let (out, report) = lt.proc(&i).unwrap();
        assert_eq!(out.linear_ms, params.float_speed_ms);
        assert_eq!(report.speed_limit, Some(SpeedLimit::Float));

        i.policy.drive.keep_slow = true;
        let (out, report) = lt.proc(&i).unwrap();
        assert_eq!(out.linear_ms, params.keep_slow_speed_ms);
        assert_eq!(report.speed_limit, Some(SpeedLimit::KeepSlow));

        i.path.track_reverse = true;
        i.pose = Pose::new(0.0, 0.0, PI);
        let (out, _) = lt.proc(&i).unwrap();
        assert_eq!(out.linear_ms, -params.keep_slow_speed_ms);
    }

    #[test]
    fn test_lift_stops_everything() {
        let mut lt = LineTracker::default();
        let mut i = input(Pose::new(0.0, 0.0, 0.3), (-1.0, 0.0), (10.0, 0.0));
        i.policy.lift = true;

        let (out, _) = lt.proc(&i).unwrap();
        assert_eq!(out.linear_ms, 0.0);
        assert_eq!(out.angular_rads, 0.0);
        assert!(!out.mow_enable);
    }

    #[test]
    fn test_kidnap_edges() {
        let mut lt = LineTracker::default();
        let tol = Params::default().kidnap_path_tolerance_m;

        let i = input(Pose::new(0.0, tol + 1.0, 0.0), (-10.0, 0.0), (10.0, 0.0));
        assert_eq!(lt.proc(&i).unwrap().0.events, vec![TrackEvent::Kidnapped(true)]);
        assert!(lt.proc(&i).unwrap().0.events.is_empty());
        assert!(lt.is_kidnapped());

        let i = input(Pose::new(0.0, 0.0, 0.0), (-10.0, 0.0), (10.0, 0.0));
        assert_eq!(lt.proc(&i).unwrap().0.events, vec![TrackEvent::Kidnapped(false)]);
    }

    #[test]
    fn test_fix_timeout() {
        let mut lt = LineTracker::default();
        let timeout = Params::default().fix_timeout_s.unwrap();

        let mut i = input(Pose::new(0.0, 0.0, 0.0), (-1.0, 0.0), (10.0, 0.0));
        i.now_s = 100.0;
        i.policy.last_fix_time_s = None;
        assert!(lt.proc(&i).unwrap().0.events.is_empty());

        i.now_s = 100.0 + timeout + 0.1;
        assert_eq!(lt.proc(&i).unwrap().0.events, vec![TrackEvent::GpsFixTimeout]);

        i.policy.last_fix_time_s = Some(i.now_s - 1.0);
        assert!(lt.proc(&i).unwrap().0.events.is_empty());
    }

    #[test]
    fn test_dock_approach_timeout() {
        let mut lt = LineTracker::default();
        let params = Params::default();

        let mut i = input(Pose::new(-4.0, 0.0, PI), (-3.0, 0.0), (-6.0, 0.0));
        i.path.way_mode = Some(WayMode::Dock);
        i.path.is_docking = true;
        i.path.targeting_last_dock_point = true;

        let (out, report) = lt.proc(&i).unwrap();
        assert_eq!(out.angular_rads, 0.0);
        assert_eq!(out.linear_ms, params.dock_no_rotation_speed_ms);
        assert!(!out.mow_enable);
        assert!(report.angle_fits);

        i.now_s = params.dock_no_rotation_timeout_s + 0.1;
        let (out, _) = lt.proc(&i).unwrap();
        assert_eq!(out.events, vec![TrackEvent::DockApproachTimeout]);
    }
}
