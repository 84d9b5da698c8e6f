//! # Path
//!
//! This module defines the interface to the path generator, which supplies the waypoints the line
//! tracker follows and records obstacle positions, along with [`WaypointPath`], a simple in-memory
//! generator built from a fixed list of mow points and dock points.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::loc::Pose;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Distance to the last dock point under which the mower is considered to be in the dock when a
/// mow route is started.
const IN_DOCK_DIST_M: f64 = 0.5;

/// Maximum turn at a waypoint for the next segment to count as straight ahead.
const STRAIGHT_TURN_RAD: f64 = 20.0 * std::f64::consts::PI / 180.0;

/// Obstacles kept in memory, the oldest is forgotten first.
const MAX_OBSTACLES: usize = 50;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Supplies waypoints to the line tracker and records obstacles.
///
/// Only the methods without a default are required, the others describe optional map features
/// (slow zones, reverse tracking, dock approach details, GPS reboot points) which default to
/// "not present".
pub trait PathGenerator {
    /// Get the segment currently being tracked.
    fn get_target_pair(&self) -> WaypointPair;

    /// Move to the next waypoint. Returns `false` if there are no further waypoints.
    fn advance_to_next(&mut self, pose: &Pose) -> bool;

    /// Distance from the pose to the current target.
    fn distance_to_target(&self, pose: &Pose) -> f64;

    /// Record an obstacle at `radius_m` from the pose, `angle_offset_rad` off the heading.
    fn mark_obstacle(&mut self, pose: &Pose, angle_offset_rad: f64, radius_m: f64, diameter_m: f64);

    /// The current target is on the dock path.
    fn is_at_dock_path(&self) -> bool;

    /// Following the dock points towards the charger.
    fn is_docking(&self) -> bool;

    /// Following the dock points away from the charger.
    fn is_undocking(&self) -> bool;

    fn way_mode(&self) -> WayMode;

    /// Plan a mow route from the pose. Returns `false` if no route could be found.
    fn start_mowing(&mut self, pose: &Pose) -> bool;

    /// Plan a route to the charger from the pose. Returns `false` if no route could be found.
    fn start_docking(&mut self, pose: &Pose) -> bool;

    /// Distance from the pose to the previous target.
    fn distance_to_last_target(&self, pose: &Pose) -> f64 {
        pose.distance_to(&self.get_target_pair().last_target)
    }

    /// Travelling towards the first dock point.
    fn going_to_dock_path(&self) -> bool {
        false
    }

    /// The current target is the charging contact.
    fn targeting_last_dock_point(&self) -> bool {
        false
    }

    /// Undocking, between the charging contact and the dock point before it.
    fn between_last_dock_points(&self) -> bool {
        false
    }

    /// The current segment lies in a slow zone.
    fn track_slow(&self) -> bool {
        false
    }

    /// The current segment is to be driven in reverse.
    fn track_reverse(&self) -> bool {
        false
    }

    /// The segment after the current target continues straight ahead.
    fn next_point_is_straight(&self) -> bool {
        false
    }

    /// A GPS receiver reboot is requested at the reboot point of the dock path.
    fn should_gps_reboot(&self) -> bool {
        false
    }

    /// The mower has reached the GPS reboot point.
    fn at_gps_reboot_point(&self) -> bool {
        false
    }

    /// Clear the GPS reboot request once the reboot has been performed.
    fn clear_gps_reboot(&mut self) {}

    /// Position of the charging contact, if a dock is mapped.
    fn dock_position(&self) -> Option<Vector2<f64>> {
        None
    }
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The segment being tracked, from the last target to the current target.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WaypointPair {
    pub last_target: Vector2<f64>,
    pub target: Vector2<f64>,
}

/// Waypoints as loaded from the parameter file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathParams {
    /// Mow points in order, as `[x, y]`
    pub mow_points: Vec<[f64; 2]>,

    /// Dock points in order from the dock path entry to the charging contact, as `[x, y]`
    pub dock_points: Vec<[f64; 2]>,

    /// Index into the dock points at which the GPS receiver is rebooted when undocking
    pub gps_reboot_dock_idx: Option<usize>,
}

/// An obstacle recorded on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Obstacle {
    pub centre_m: Vector2<f64>,
    pub diameter_m: f64,
}

/// Fixed waypoint path generator.
///
/// Mowing follows the mow points in order, resuming from the last reached mow point when mowing
/// is restarted. Docking follows the dock points to the charger, undocking follows them back in
/// reverse before joining the mow points.
#[derive(Debug, Clone)]
pub struct WaypointPath {
    mow_points: Vec<Vector2<f64>>,
    dock_points: Vec<Vector2<f64>>,
    gps_reboot_dock_idx: Option<usize>,

    /// Index of the next mow point to visit
    mow_idx: usize,

    route: Vec<RoutePoint>,
    route_idx: usize,

    /// Start of the first route segment
    route_start: Vector2<f64>,

    docking: bool,
    undocking: bool,
    gps_reboot_pending: bool,

    obstacles: Vec<Obstacle>,
}

#[derive(Debug, Clone, Copy)]
struct RoutePoint {
    pos_m: Vector2<f64>,
    mode: WayMode,

    /// Index of the mow point this route point was taken from
    mow_idx: Option<usize>,

    /// Index of the dock point this route point was taken from
    dock_idx: Option<usize>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What the mower is doing on the current segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WayMode {
    /// Mowing a mow segment
    Mow,

    /// On the dock path
    Dock,

    /// Travelling between regions without mowing
    Free,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl WaypointPath {
    pub fn new(mow_points: Vec<Vector2<f64>>, dock_points: Vec<Vector2<f64>>) -> Self {
        Self {
            mow_points,
            dock_points,
            gps_reboot_dock_idx: None,
            mow_idx: 0,
            route: Vec::new(),
            route_idx: 0,
            route_start: Vector2::zeros(),
            docking: false,
            undocking: false,
            gps_reboot_pending: false,
            obstacles: Vec::new(),
        }
    }

    pub fn from_params(params: &PathParams) -> Self {
        let to_vec = |p: &[f64; 2]| Vector2::new(p[0], p[1]);

        let mut path = Self::new(
            params.mow_points.iter().map(to_vec).collect(),
            params.dock_points.iter().map(to_vec).collect(),
        );
        path.gps_reboot_dock_idx = params.gps_reboot_dock_idx;
        path
    }

    /// Request a GPS reboot at the given dock point when undocking.
    pub fn with_gps_reboot_point(mut self, dock_idx: usize) -> Self {
        self.gps_reboot_dock_idx = Some(dock_idx);
        self
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Index of the next mow point to visit.
    pub fn mow_idx(&self) -> usize {
        self.mow_idx
    }

    fn target(&self) -> Option<&RoutePoint> {
        self.route.get(self.route_idx)
    }

    fn in_dock(&self, pose: &Pose) -> bool {
        match self.dock_points.last() {
            Some(d) => pose.distance_to(d) < IN_DOCK_DIST_M,
            None => false,
        }
    }

    fn mow_route_points(&self) -> impl Iterator<Item = RoutePoint> + '_ {
        self.mow_points
            .iter()
            .enumerate()
            .skip(self.mow_idx)
            .map(|(i, p)| RoutePoint {
                pos_m: *p,
                mode: WayMode::Mow,
                mow_idx: Some(i),
                dock_idx: None,
            })
    }

    fn update_flags(&mut self) {
        let mode = self.target().map(|t| t.mode);

        if self.undocking && mode != Some(WayMode::Dock) {
            debug!("Undocking complete");
            self.undocking = false;
        }
    }
}

impl PathGenerator for WaypointPath {
    fn get_target_pair(&self) -> WaypointPair {
        let target = match self.target() {
            Some(t) => t.pos_m,
            None => self.route_start,
        };

        let last_target = match self.route_idx {
            0 => self.route_start,
            i => self.route.get(i - 1).map(|p| p.pos_m).unwrap_or(self.route_start),
        };

        WaypointPair {
            last_target,
            target,
        }
    }

    fn advance_to_next(&mut self, _pose: &Pose) -> bool {
        if let Some(RoutePoint {
            mow_idx: Some(i), ..
        }) = self.target()
        {
            self.mow_idx = i + 1;
        }

        if self.route_idx + 1 >= self.route.len() {
            // A completed pass starts from the beginning next time
            if self.mow_idx >= self.mow_points.len() {
                self.mow_idx = 0;
            }
            return false;
        }

        self.route_idx += 1;
        self.update_flags();
        true
    }

    fn distance_to_target(&self, pose: &Pose) -> f64 {
        pose.distance_to(&self.get_target_pair().target)
    }

    fn mark_obstacle(&mut self, pose: &Pose, angle_offset_rad: f64, radius_m: f64, diameter_m: f64) {
        let angle_rad = pose.heading_rad() + angle_offset_rad;
        let centre_m = pose.position_m + radius_m * Vector2::new(angle_rad.cos(), angle_rad.sin());

        debug!(
            "Obstacle marked at ({:.2}, {:.2}), diameter {:.2} m",
            centre_m[0], centre_m[1], diameter_m
        );

        if self.obstacles.len() >= MAX_OBSTACLES {
            self.obstacles.remove(0);
        }
        self.obstacles.push(Obstacle {
            centre_m,
            diameter_m,
        });
    }

    fn is_at_dock_path(&self) -> bool {
        (self.docking || self.undocking)
            && matches!(self.target(), Some(t) if t.mode == WayMode::Dock)
            && !self.going_to_dock_path()
    }

    fn is_docking(&self) -> bool {
        self.docking
    }

    fn is_undocking(&self) -> bool {
        self.undocking
    }

    fn way_mode(&self) -> WayMode {
        self.target().map(|t| t.mode).unwrap_or(WayMode::Free)
    }

    fn start_mowing(&mut self, pose: &Pose) -> bool {
        if self.mow_points.is_empty() {
            return false;
        }
        if self.mow_idx >= self.mow_points.len() {
            self.mow_idx = 0;
        }

        self.route.clear();
        self.route_idx = 0;
        self.route_start = pose.position_m;
        self.docking = false;
        self.undocking = false;

        if self.in_dock(pose) {
            // Back out along the dock path, skipping the charging contact itself
            let n = self.dock_points.len();
            self.route.extend(
                self.dock_points
                    .iter()
                    .enumerate()
                    .rev()
                    .skip(1)
                    .map(|(i, p)| RoutePoint {
                        pos_m: *p,
                        mode: WayMode::Dock,
                        mow_idx: None,
                        dock_idx: Some(i),
                    }),
            );
            if let Some(d) = self.dock_points.last() {
                self.route_start = *d;
            }
            self.undocking = n > 1;
            self.gps_reboot_pending = self.gps_reboot_dock_idx.is_some();
        }

        let first_mow = self.route.len();
        let mow_points: Vec<RoutePoint> = self.mow_route_points().collect();
        self.route.extend(mow_points);

        // The way to the first mow point is travelled without mowing
        if let Some(p) = self.route.get_mut(first_mow) {
            p.mode = WayMode::Free;
        }

        self.update_flags();

        info!(
            "Mow route planned: {} points from mow point {}{}",
            self.route.len(),
            self.mow_idx,
            if self.undocking { ", undocking first" } else { "" }
        );

        true
    }

    fn start_docking(&mut self, pose: &Pose) -> bool {
        if self.dock_points.is_empty() {
            return false;
        }

        self.route = self
            .dock_points
            .iter()
            .enumerate()
            .map(|(i, p)| RoutePoint {
                pos_m: *p,
                mode: WayMode::Dock,
                mow_idx: None,
                dock_idx: Some(i),
            })
            .collect();
        self.route_idx = 0;
        self.route_start = pose.position_m;
        self.docking = true;
        self.undocking = false;

        info!("Dock route planned: {} points", self.route.len());

        true
    }

    fn going_to_dock_path(&self) -> bool {
        self.docking && self.route_idx == 0
    }

    fn targeting_last_dock_point(&self) -> bool {
        self.docking && self.route_idx + 1 == self.route.len()
    }

    fn between_last_dock_points(&self) -> bool {
        self.undocking && self.route_idx == 0
    }

    fn track_slow(&self) -> bool {
        self.targeting_last_dock_point() || self.between_last_dock_points()
    }

    fn track_reverse(&self) -> bool {
        self.between_last_dock_points()
    }

    fn next_point_is_straight(&self) -> bool {
        let pair = self.get_target_pair();
        let next = match self.route.get(self.route_idx + 1) {
            Some(n) => n.pos_m,
            None => return false,
        };

        let seg = pair.target - pair.last_target;
        let next_seg = next - pair.target;
        if seg.norm() == 0.0 || next_seg.norm() == 0.0 {
            return false;
        }

        seg.angle(&next_seg) < STRAIGHT_TURN_RAD
    }

    fn should_gps_reboot(&self) -> bool {
        self.gps_reboot_pending
    }

    fn at_gps_reboot_point(&self) -> bool {
        match (self.gps_reboot_dock_idx, self.target()) {
            (Some(reboot), Some(t)) => self.undocking && t.dock_idx.map_or(false, |i| i < reboot),
            _ => false,
        }
    }

    fn clear_gps_reboot(&mut self) {
        self.gps_reboot_pending = false;
    }

    fn dock_position(&self) -> Option<Vector2<f64>> {
        self.dock_points.last().copied()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn square() -> WaypointPath {
        WaypointPath::new(
            vec![
                Vector2::new(0.0, 0.0),
                Vector2::new(10.0, 0.0),
                Vector2::new(10.0, 10.0),
            ],
            vec![
                Vector2::new(-2.0, 0.0),
                Vector2::new(-4.0, 0.0),
                Vector2::new(-5.0, 0.0),
            ],
        )
    }

    #[test]
    fn test_mow_route_resumes() {
        let mut path = square();
        let pose = Pose::new(1.0, 1.0, 0.0);

        assert!(path.start_mowing(&pose));
        assert_eq!(path.way_mode(), WayMode::Free);
        assert_eq!(path.get_target_pair().last_target, Vector2::new(1.0, 1.0));
        assert_eq!(path.get_target_pair().target, Vector2::new(0.0, 0.0));

        assert!(path.advance_to_next(&pose));
        assert_eq!(path.way_mode(), WayMode::Mow);
        assert_eq!(path.get_target_pair().last_target, Vector2::new(0.0, 0.0));
        assert!(!path.next_point_is_straight());

        // Interrupt and restart, continuing from the reached mow point
        assert!(path.start_mowing(&pose));
        assert_eq!(path.get_target_pair().target, Vector2::new(10.0, 0.0));

        assert!(path.advance_to_next(&pose));
        assert!(!path.advance_to_next(&pose));
        assert_eq!(path.mow_idx(), 0);
    }

    #[test]
    fn test_dock_route() {
        let mut path = square();
        let pose = Pose::new(5.0, 5.0, 0.0);

        assert!(path.start_docking(&pose));
        assert!(path.is_docking());
        assert!(path.going_to_dock_path());
        assert!(!path.is_at_dock_path());

        assert!(path.advance_to_next(&pose));
        assert!(path.is_at_dock_path());
        assert!(!path.targeting_last_dock_point());

        assert!(path.advance_to_next(&pose));
        assert!(path.targeting_last_dock_point());
        assert!(path.track_slow());
        assert!(!path.advance_to_next(&pose));
        assert_eq!(path.dock_position(), Some(Vector2::new(-5.0, 0.0)));
    }

    #[test]
    fn test_undock_then_mow() {
        let mut path = square().with_gps_reboot_point(1);
        let pose = Pose::new(-5.0, 0.0, 0.0);

        assert!(path.start_mowing(&pose));
        assert!(path.is_undocking());
        assert!(path.between_last_dock_points());
        assert!(path.track_reverse());
        assert!(path.should_gps_reboot());
        assert!(!path.at_gps_reboot_point());
        assert_eq!(path.get_target_pair().target, Vector2::new(-4.0, 0.0));

        assert!(path.advance_to_next(&pose));
        assert!(!path.track_reverse());
        assert!(path.next_point_is_straight());
        assert!(path.at_gps_reboot_point());
        path.clear_gps_reboot();
        assert!(!path.should_gps_reboot());

        assert!(path.advance_to_next(&pose));
        assert!(!path.is_undocking());
        assert_eq!(path.way_mode(), WayMode::Free);
    }

    #[test]
    fn test_mark_obstacle() {
        let mut path = square();
        let pose = Pose::new(1.0, 2.0, std::f64::consts::FRAC_PI_2);

        path.mark_obstacle(&pose, 0.0, 0.5, 0.2);

        let obs = path.obstacles()[0];
        assert!((obs.centre_m - Vector2::new(1.0, 2.5)).norm() < 1e-9);
        assert_eq!(obs.diameter_m, 0.2);
    }

    #[test]
    fn test_obstacles_bounded() {
        let mut path = square();

        for i in 0..(MAX_OBSTACLES + 10) {
            let pose = Pose::new(i as f64, 0.0, 0.0);
            path.mark_obstacle(&pose, 0.0, 0.5, 0.2);
        }

        assert_eq!(path.obstacles().len(), MAX_OBSTACLES);
        assert!((path.obstacles()[0].centre_m[0] - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_routes_fail() {
        let mut path = WaypointPath::new(vec![], vec![]);
        let pose = Pose::default();

        assert!(!path.start_mowing(&pose));
        assert!(!path.start_docking(&pose));
        assert_eq!(path.way_mode(), WayMode::Free);
        assert!(!path.advance_to_next(&pose));
    }
}
