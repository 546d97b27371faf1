//! Takeoff and landing detection.
//!
//! Both detectors look for a jump in speed between consecutive points, then
//! confirm it by averaging speed over a window before and a window after the
//! candidate. Windows stop at the track boundaries without error, so events
//! near either end usually fail confirmation.

use serde::{Deserialize, Serialize};

use crate::tracklog::TrackPoint;
use crate::{LandingParams, Params, TakeoffParams, WindowSpec};

/// Elapsed-time weighted mean speed over a run of points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowAverage {
    pub speed_kmh: f64,
    pub samples: usize,
    pub elapsed_s: f64,
}

/// Walk away from `anchor` (backward when `duration_s` is negative) until at
/// least `|duration_s|` seconds and `min_samples` points have been collected,
/// or the track ends. The anchor itself is not part of the window.
pub fn window_average(
    points: &[TrackPoint],
    anchor: usize,
    duration_s: f64,
    min_samples: usize,
) -> WindowAverage {
    let target = duration_s.abs();
    let backward = duration_s < 0.0;
    let mut idx = anchor;
    let mut elapsed_total = 0.0;
    let mut weighted = 0.0;
    let mut samples = 0usize;

    while elapsed_total < target || samples < min_samples {
        idx = if backward {
            match idx.checked_sub(1) {
                Some(i) => i,
                None => break,
            }
        } else {
            idx + 1
        };
        let Some(point) = points.get(idx) else {
            break;
        };
        let elapsed = point.elapsed();
        if let Some(speed) = point.speed() {
            weighted += speed * elapsed;
        }
        elapsed_total += elapsed;
        samples += 1;
    }

    WindowAverage {
        speed_kmh: if elapsed_total > 0.0 {
            weighted / elapsed_total
        } else {
            0.0
        },
        samples,
        elapsed_s: elapsed_total,
    }
}

fn window(points: &[TrackPoint], anchor: usize, spec: &WindowSpec) -> WindowAverage {
    window_average(points, anchor, spec.duration_s, spec.min_samples)
}

/// Speed change from `idx - 1` to `idx`, if both speeds are defined.
fn speed_delta(points: &[TrackPoint], idx: usize) -> Option<f64> {
    let prev = points.get(idx.checked_sub(1)?)?.speed()?;
    let cur = points.get(idx)?.speed()?;
    Some(cur - prev)
}

pub fn is_takeoff(points: &[TrackPoint], idx: usize, params: &TakeoffParams) -> bool {
    match speed_delta(points, idx) {
        Some(delta) if delta > params.candidate_delta_kmh => {}
        _ => return false,
    }
    window(points, idx, &params.before).speed_kmh < params.before_max_kmh
        && window(points, idx, &params.after).speed_kmh > params.after_min_kmh
}

pub fn is_landing(points: &[TrackPoint], idx: usize, params: &LandingParams) -> bool {
    match speed_delta(points, idx) {
        Some(delta) if -delta > params.candidate_delta_kmh => {}
        _ => return false,
    }
    window(points, idx, &params.before).speed_kmh > params.before_min_kmh
        && window(points, idx, &params.after).speed_kmh < params.after_max_kmh
}

pub fn find_takeoffs(points: &[TrackPoint], params: &TakeoffParams) -> Vec<usize> {
    (1..points.len())
        .filter(|&i| is_takeoff(points, i, params))
        .collect()
}

pub fn find_landings(points: &[TrackPoint], params: &LandingParams) -> Vec<usize> {
    (1..points.len())
        .filter(|&i| is_landing(points, i, params))
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Events {
    pub takeoffs: Vec<usize>,
    pub landings: Vec<usize>,
}

pub fn detect_events(points: &[TrackPoint], params: &Params) -> Events {
    Events {
        takeoffs: find_takeoffs(points, &params.takeoff),
        landings: find_landings(points, &params.landing),
    }
}

/// Everything the detectors look at for one index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub index: usize,
    pub speed_kmh: Option<f64>,
    pub speed_delta_kmh: Option<f64>,
    pub takeoff_before: WindowAverage,
    pub takeoff_after: WindowAverage,
    pub landing_before: WindowAverage,
    pub landing_after: WindowAverage,
    pub is_takeoff: bool,
    pub is_landing: bool,
}

/// Returns `None` when `index` is out of range.
pub fn probe(points: &[TrackPoint], index: usize, params: &Params) -> Option<Probe> {
    let point = points.get(index)?;
    Some(Probe {
        index,
        speed_kmh: point.speed(),
        speed_delta_kmh: speed_delta(points, index),
        takeoff_before: window(points, index, &params.takeoff.before),
        takeoff_after: window(points, index, &params.takeoff.after),
        landing_before: window(points, index, &params.landing.before),
        landing_after: window(points, index, &params.landing.after),
        is_takeoff: is_takeoff(points, index, &params.takeoff),
        is_landing: is_landing(points, index, &params.landing),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracklog::derive_metrics;
    use crate::tracklog::test_support::fixes_from_speeds;

    fn points(speeds: &[f64]) -> Vec<TrackPoint> {
        derive_metrics(&fixes_from_speeds(speeds))
    }

    fn repeat(speed: f64, n: usize) -> Vec<f64> {
        vec![speed; n]
    }

    #[test]
    fn window_collects_duration_and_samples() {
        let pts = points(&repeat(10.0, 20));
        let avg = window_average(&pts, 10, 5.0, 2);
        assert_eq!(avg.samples, 5);
        assert_eq!(avg.elapsed_s, 5.0);
        assert!((avg.speed_kmh - 10.0).abs() < 1e-6);

        let avg = window_average(&pts, 10, 2.0, 4);
        assert_eq!(avg.samples, 4);
    }

    #[test]
    fn window_is_weighted_by_elapsed() {
        let mut fixes = fixes_from_speeds(&[0.0]);
        let last = *fixes.last().unwrap();
        // 3 seconds at 12 km/h after the 1 second at 0 km/h.
        let mut next = last;
        next.latitude += (10.0 / crate::geo::EARTH_RADIUS_M).to_degrees();
        next.time_ms += 3000;
        fixes.push(next);
        let pts = derive_metrics(&fixes);
        let avg = window_average(&pts, 0, 4.0, 1);
        assert_eq!(avg.samples, 2);
        assert!((avg.speed_kmh - 9.0).abs() < 1e-6, "{}", avg.speed_kmh);
    }

    #[test]
    fn window_stops_at_boundaries() {
        let pts = points(&repeat(10.0, 5));
        let back = window_average(&pts, 2, -60.0, 2);
        // Points 1 and 0; the first point contributes no time.
        assert_eq!(back.samples, 2);
        assert_eq!(back.elapsed_s, 1.0);

        let fwd = window_average(&pts, 3, 60.0, 2);
        assert_eq!(fwd.samples, 2);
        assert_eq!(fwd.elapsed_s, 2.0);

        let none = window_average(&pts, pts.len() - 1, 10.0, 1);
        assert_eq!(none, WindowAverage::default());
    }

    fn takeoff_speeds() -> Vec<f64> {
        let mut speeds = repeat(0.0, 120);
        speeds.push(36.0);
        speeds.extend(repeat(40.0, 40));
        speeds
    }

    #[test]
    fn single_takeoff_is_found() {
        let pts = points(&takeoff_speeds());
        let events = detect_events(&pts, &Params::default());
        assert_eq!(events.takeoffs, vec![121]);
        assert!(events.landings.is_empty());
    }

    #[test]
    fn single_landing_is_found() {
        let mut speeds = repeat(40.0, 90);
        speeds.extend(repeat(0.0, 90));
        let pts = points(&speeds);
        let events = detect_events(&pts, &Params::default());
        assert_eq!(events.landings, vec![91]);
        assert!(events.takeoffs.is_empty());
    }

    #[test]
    fn constant_speed_has_no_events() {
        let pts = points(&repeat(25.0, 300));
        assert_eq!(detect_events(&pts, &Params::default()), Events::default());
    }

    #[test]
    fn empty_and_single_point_tracks() {
        let params = Params::default();
        assert_eq!(detect_events(&[], &params), Events::default());
        assert_eq!(detect_events(&points(&[]), &params), Events::default());
        assert!(probe(&[], 0, &params).is_none());
    }

    #[test]
    fn takeoff_at_track_start_fails_confirmation() {
        // The jump is the last point, so the forward window is empty.
        let mut speeds = repeat(0.0, 3);
        speeds.push(30.0);
        let pts = points(&speeds);
        assert!(find_takeoffs(&pts, &Params::default().takeoff).is_empty());
    }

    #[test]
    fn probe_reports_windows() {
        let pts = points(&takeoff_speeds());
        let p = probe(&pts, 121, &Params::default()).unwrap();
        assert!(p.is_takeoff);
        assert!(!p.is_landing);
        assert_eq!(p.takeoff_before.samples, 60);
        assert!(p.takeoff_before.speed_kmh < 1e-9);
        assert!(p.takeoff_after.speed_kmh > 39.0);
        assert!((p.speed_delta_kmh.unwrap() - 36.0).abs() < 1e-6);
    }
}
