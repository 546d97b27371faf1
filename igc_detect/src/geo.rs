//! Great-circle distance on a spherical earth.

/// Mean earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in meters between two coordinates in decimal degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair outside [0, 1] near antipodes.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let dist = haversine_distance(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 200.0);
    }

    #[test]
    fn identical_points_are_zero_apart() {
        assert_eq!(haversine_distance(42.79, -0.55, 42.79, -0.55), 0.0);
    }

    #[test]
    fn antipodes_are_half_circumference_apart() {
        let dist = haversine_distance(10.0, 20.0, -10.0, -160.0);
        let half = std::f64::consts::PI * EARTH_RADIUS_M;
        assert!((dist - half).abs() < 1.0, "{dist} vs {half}");
    }

    #[test]
    fn short_hops_stay_precise() {
        // One meter north along a meridian.
        let dlat = (1.0 / EARTH_RADIUS_M).to_degrees();
        let dist = haversine_distance(45.0, 6.0, 45.0 + dlat, 6.0);
        assert!((dist - 1.0).abs() < 1e-6, "{dist}");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn distance_is_symmetric(
                lat1 in -90.0..90.0_f64,
                lon1 in -180.0..180.0_f64,
                lat2 in -90.0..90.0_f64,
                lon2 in -180.0..180.0_f64,
            ) {
                let ab = haversine_distance(lat1, lon1, lat2, lon2);
                let ba = haversine_distance(lat2, lon2, lat1, lon1);
                prop_assert!((ab - ba).abs() < 1e-6, "{} vs {}", ab, ba);
            }

            #[test]
            fn distance_to_self_is_zero(lat in -90.0..90.0_f64, lon in -180.0..180.0_f64) {
                prop_assert_eq!(haversine_distance(lat, lon, lat, lon), 0.0);
            }

            #[test]
            fn triangle_inequality_holds(
                lat1 in -90.0..90.0_f64,
                lon1 in -180.0..180.0_f64,
                lat2 in -90.0..90.0_f64,
                lon2 in -180.0..180.0_f64,
                lat3 in -90.0..90.0_f64,
                lon3 in -180.0..180.0_f64,
            ) {
                let ab = haversine_distance(lat1, lon1, lat2, lon2);
                let bc = haversine_distance(lat2, lon2, lat3, lon3);
                let ac = haversine_distance(lat1, lon1, lat3, lon3);
                prop_assert!(ac <= ab + bc + 1.0, "{} > {} + {}", ac, ab, bc);
            }
        }
    }
}
