//! Line tracker control laws

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector2;

use comms_if::eqpt::sensors::GpsSolution;
use util::maths::lin_map;

use super::{Params, StanleyGains};
use crate::auto::path::WaypointPair;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Signed distance from the point to the infinite line through the segment.
///
/// Positive to the right of the line (looking from the last target to the target), so a positive
/// error calls for a turn to the left. A zero length segment has no lateral error.
pub fn lateral_error(pair: &WaypointPair, point_m: &Vector2<f64>) -> f64 {
    let a = pair.last_target;
    let b = pair.target;
    let seg = b - a;
    let len = seg.norm();

    if len == 0.0 {
        return 0.0;
    }

    (seg[1] * point_m[0] - seg[0] * point_m[1] + b[0] * a[1] - b[1] * a[0]) / len
}

/// Unsigned distance from the point to the segment itself.
pub fn distance_to_segment(pair: &WaypointPair, point_m: &Vector2<f64>) -> f64 {
    let seg = pair.target - pair.last_target;
    let len_sq = seg.norm_squared();

    if len_sq == 0.0 {
        return (point_m - pair.target).norm();
    }

    let t = ((point_m - pair.last_target).dot(&seg) / len_sq).clamp(0.0, 1.0);
    (point_m - (pair.last_target + t * seg)).norm()
}

/// Rotation speed magnitude for a rotation on the spot with the given heading error.
pub fn rotation_speed(params: &Params, heading_err_rad: f64) -> f64 {
    let err = heading_err_rad.abs();

    if params.rotation_ramp {
        (err + params.rotation_ramp_min_rads)
            .clamp(params.rotation_ramp_min_rads, params.rotation_ramp_max_rads)
    } else if err <= params.angle_diff_2_rad {
        params.rotate_speed_3_rads
    } else if err < params.angle_diff_1_rad {
        params.rotate_speed_2_rads
    } else {
        params.rotate_speed_1_rads
    }
}

/// Select the Stanley gains for the current conditions.
pub fn stanley_gains(
    params: &Params,
    gps_solution: GpsSolution,
    track_slow: bool,
    speed_ms: f64,
) -> StanleyGains {
    let (normal, slow) = match gps_solution {
        GpsSolution::Fixed => (params.stanley_normal, params.stanley_slow),
        _ => (params.stanley_float_normal, params.stanley_float_slow),
    };

    if params.map_stanley_control {
        let range = (params.motor_min_speed_ms, params.motor_max_speed_ms);
        let speed = speed_ms.abs();
        let map = |lo: f64, hi: f64| lin_map(range, (lo, hi), speed).clamp(lo.min(hi), lo.max(hi));

        StanleyGains {
            k: map(slow.k, normal.k),
            p: map(slow.p, normal.p),
        }
    } else if track_slow {
        slow
    } else {
        normal
    }
}

/// Stanley steering law, clamped to the steering limit.
pub fn stanley(
    gains: StanleyGains,
    heading_err_rad: f64,
    lat_err_m: f64,
    speed_ms: f64,
    max_steering_rad: f64,
) -> f64 {
    let angular = gains.p * heading_err_rad + (gains.k * lat_err_m).atan2(0.001 + speed_ms.abs());

    angular.clamp(-max_steering_rad, max_steering_rad)
}

/// Scale the speed down approaching a waypoint and up leaving one.
///
/// `was_straight` carries the straightness of the previous waypoint from the approach to the
/// departure.
pub fn distance_ramp(
    params: &Params,
    linear_ms: f64,
    cruise_speed_ms: f64,
    dist_target_m: f64,
    dist_last_target_m: f64,
    straight: bool,
    was_straight: &mut bool,
) -> f64 {
    if cruise_speed_ms <= 0.0 || linear_ms <= 0.0 {
        return linear_ms;
    }

    let max_speed = linear_ms;
    let mut min_speed = params.distance_ramp_min_speed_ms;

    // A slower chosen speed starts the ramp closer to the waypoint
    let mut max_dist = linear_ms * params.near_waypoint_dist_m / cruise_speed_ms;

    let mut act_dist = if dist_target_m <= dist_last_target_m {
        // Approaching, arriving fast needs an earlier start
        max_dist += max_speed;
        if straight {
            min_speed = params.transition_speed_ms;
        }
        *was_straight = straight;
        dist_target_m
    } else {
        if *was_straight {
            min_speed = params.transition_speed_ms;
        }
        dist_last_target_m
    };

    // Close waypoints never reach full speed anyway
    if dist_target_m + dist_last_target_m < max_dist {
        act_dist *= 2.0;
    }

    let lo = min_speed.min(max_speed);
    lin_map((0.0, max_dist), (min_speed, max_speed), act_dist).clamp(lo, max_speed)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const EPS: f64 = 1e-9;

    fn pair() -> WaypointPair {
        WaypointPair {
            last_target: Vector2::new(0.0, 0.0),
            target: Vector2::new(10.0, 0.0),
        }
    }

    #[test]
    fn test_lateral_error_sign() {
        // Left of an eastbound line needs a right turn
        assert!((lateral_error(&pair(), &Vector2::new(5.0, 1.0)) + 1.0).abs() < EPS);
        assert!((lateral_error(&pair(), &Vector2::new(5.0, -0.5)) - 0.5).abs() < EPS);

        // The line is infinite, beyond the target the error is still perpendicular
        assert!((lateral_error(&pair(), &Vector2::new(15.0, 2.0)) + 2.0).abs() < EPS);

        let degenerate = WaypointPair {
            last_target: Vector2::new(1.0, 1.0),
            target: Vector2::new(1.0, 1.0),
        };
        assert_eq!(lateral_error(&degenerate, &Vector2::new(3.0, 4.0)), 0.0);
    }

    #[test]
    fn test_distance_to_segment() {
        assert!((distance_to_segment(&pair(), &Vector2::new(5.0, 1.0)) - 1.0).abs() < EPS);
        assert!((distance_to_segment(&pair(), &Vector2::new(13.0, 4.0)) - 5.0).abs() < EPS);
    }

    #[test]
    fn test_rotation_tiers() {
        let params = Params::default();

        assert_eq!(rotation_speed(&params, 1.5), params.rotate_speed_1_rads);
        assert_eq!(rotation_speed(&params, -0.3), params.rotate_speed_2_rads);
        assert_eq!(rotation_speed(&params, 0.1), params.rotate_speed_3_rads);

        let params = Params {
            rotation_ramp: true,
            ..Default::default()
        };
        assert_eq!(rotation_speed(&params, 3.0), params.rotation_ramp_max_rads);
        assert_eq!(rotation_speed(&params, 0.0), params.rotation_ramp_min_rads);
    }

    #[test]
    fn test_stanley_clamped() {
        let gains = StanleyGains { k: 1.0, p: 3.0 };

        assert_eq!(stanley(gains, 0.0, 0.0, 0.3, 0.5), 0.0);
        assert_eq!(stanley(gains, 1.0, 0.0, 0.3, 0.5), 0.5);
        assert_eq!(stanley(gains, 0.0, -10.0, 0.3, 0.5), -0.5);

        let small = stanley(gains, 0.01, 0.0, 0.3, 0.5);
        assert!((small - 0.03).abs() < EPS);
    }

    #[test]
    fn test_stanley_gains_selection() {
        let params = Params::default();

        assert_eq!(
            stanley_gains(&params, GpsSolution::Fixed, false, 0.3),
            params.stanley_normal
        );
        assert_eq!(
            stanley_gains(&params, GpsSolution::Fixed, true, 0.3),
            params.stanley_slow
        );
        assert_eq!(
            stanley_gains(&params, GpsSolution::Float, false, 0.3),
            params.stanley_float_normal
        );

        let params = Params {
            map_stanley_control: true,
            ..Default::default()
        };
        let g = stanley_gains(&params, GpsSolution::Fixed, false, params.motor_max_speed_ms);
        assert!((g.k - params.stanley_normal.k).abs() < EPS);
        let g = stanley_gains(&params, GpsSolution::Fixed, false, 0.0);
        assert!((g.k - params.stanley_slow.k).abs() < EPS);
    }

    #[test]
    fn test_distance_ramp_slows_near_target() {
        let params = Params::default();
        let mut was_straight = false;

        let far = distance_ramp(&params, 0.3, 0.3, 5.0, 5.0, false, &mut was_straight);
        let near = distance_ramp(&params, 0.3, 0.3, 0.2, 5.0, false, &mut was_straight);
        let at = distance_ramp(&params, 0.3, 0.3, 0.0, 5.0, false, &mut was_straight);

        assert!((far - 0.3).abs() < EPS);
        assert!(near < far && near > at);
        assert!((at - params.distance_ramp_min_speed_ms).abs() < EPS);

        // A straight continuation keeps the transition speed
        let at = distance_ramp(&params, 0.3, 0.3, 0.0, 5.0, true, &mut was_straight);
        assert!((at - params.transition_speed_ms).abs() < EPS);
        assert!(was_straight);
    }
}
