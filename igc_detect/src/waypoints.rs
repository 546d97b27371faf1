//! Cross-track takeoff aggregation and GPX waypoint export.

use std::io::Write;

use geo_types::Point;
use gpx::{Gpx, GpxVersion, Waypoint};

use crate::tracklog::{Fix, Tracklog};
use crate::IgcError;

const GPX_CREATOR: &str = "igc-detect";

/// Keep the first of any group of fixes closer than `radius_m` to an
/// already kept fix, preserving encounter order.
pub fn dedup_fixes<I>(fixes: I, radius_m: f64) -> Vec<Fix>
where
    I: IntoIterator<Item = Fix>,
{
    let mut kept: Vec<Fix> = Vec::new();
    for fix in fixes {
        if kept.iter().all(|k| k.distance_to(&fix) >= radius_m) {
            kept.push(fix);
        }
    }
    kept
}

/// Takeoff fixes of every track, in track order, with duplicates removed.
pub fn collect_takeoffs(tracklogs: &[Tracklog], radius_m: f64) -> Vec<Fix> {
    let all = tracklogs.iter().flat_map(|t| t.takeoff_fixes());
    let kept = dedup_fixes(all, radius_m);
    tracing::debug!(tracks = tracklogs.len(), takeoffs = kept.len(), "collected takeoffs");
    kept
}

/// Build a GPX 1.1 document with one named waypoint per fix.
pub fn build_gpx(fixes: &[Fix], label: &str) -> Gpx {
    let waypoints = fixes
        .iter()
        .map(|fix| {
            let mut wpt = Waypoint::new(Point::new(fix.longitude, fix.latitude));
            wpt.name = Some(label.to_string());
            wpt.elevation = Some(fix.altitude as f64);
            wpt
        })
        .collect();
    Gpx {
        version: GpxVersion::Gpx11,
        creator: Some(GPX_CREATOR.to_string()),
        waypoints,
        ..Default::default()
    }
}

pub fn write_gpx<W: Write>(fixes: &[Fix], label: &str, writer: W) -> Result<(), IgcError> {
    let doc = build_gpx(fixes, label);
    gpx::write(&doc, writer).map_err(|e| IgcError::GpxWrite(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::EARTH_RADIUS_M;
    use crate::tracklog::test_support::fix_at;
    use crate::tracklog::TrackPoint;

    fn meters_north(fix: Fix, meters: f64) -> Fix {
        Fix {
            latitude: fix.latitude + (meters / EARTH_RADIUS_M).to_degrees(),
            ..fix
        }
    }

    #[test]
    fn nearby_takeoffs_collapse_to_first() {
        let a = fix_at(42.0, 0);
        let b = meters_north(a, 60.0);
        let c = meters_north(a, 250.0);
        let d = meters_north(c, 99.0);
        let kept = dedup_fixes([a, b, c, d], 100.0);
        assert_eq!(kept, vec![a, c]);
    }

    #[test]
    fn takeoffs_are_collected_across_tracks() {
        let a = fix_at(42.0, 0);
        let b = meters_north(a, 30.0);
        let far = meters_north(a, 5_000.0);

        let mut first = Tracklog::new("one");
        first.points = vec![TrackPoint::new(a), TrackPoint::new(far)];
        first.takeoffs = vec![0, 1];
        let mut second = Tracklog::new("two");
        second.points = vec![TrackPoint::new(b)];
        second.takeoffs = vec![0];

        let kept = collect_takeoffs(&[first, second], 100.0);
        assert_eq!(kept, vec![a, far]);
    }

    #[test]
    fn gpx_output_has_labelled_waypoints() {
        let fixes = vec![fix_at(42.5, 0), fix_at(-12.25, 0)];
        let mut buf = Vec::new();
        write_gpx(&fixes, "Takeoff", &mut buf).unwrap();

        let doc = gpx::read(buf.as_slice()).unwrap();
        assert_eq!(doc.waypoints.len(), 2);
        assert_eq!(doc.waypoints[0].name.as_deref(), Some("Takeoff"));
        let p = doc.waypoints[1].point();
        assert!((p.y() + 12.25).abs() < 1e-9);
        assert!((p.x() - 0.5).abs() < 1e-9);
    }
}
