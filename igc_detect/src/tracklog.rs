//! Track data model, per-fix derived metrics and the noise filter.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::haversine_distance;
use crate::NoiseParams;

/// One recorder sample as read from a B record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Decimal degrees, negative south.
    pub latitude: f64,
    /// Decimal degrees, negative west.
    pub longitude: f64,
    /// GPS altitude in meters.
    pub altitude: i32,
    /// Pressure altitude in meters. Kept for export only.
    pub baro_altitude: i32,
    /// Milliseconds since the Unix epoch, UTC.
    pub time_ms: i64,
}

impl Fix {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time_ms)
    }

    pub fn distance_to(&self, other: &Fix) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Metrics relative to the preceding fix of the unfiltered sequence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Derived {
    pub distance_m: f64,
    pub elapsed_s: f64,
    /// `None` when `elapsed_s` is zero.
    pub speed_kmh: Option<f64>,
}

impl Derived {
    fn between(prev: &Fix, cur: &Fix) -> Self {
        let distance_m = prev.distance_to(cur);
        let elapsed_s = (cur.time_ms - prev.time_ms) as f64 / 1000.0;
        let speed_kmh = if elapsed_s > 0.0 {
            Some((distance_m / 1000.0) / (elapsed_s / 3600.0))
        } else {
            None
        };
        Self {
            distance_m,
            elapsed_s,
            speed_kmh,
        }
    }
}

/// A fix plus its derived metrics. The first point of a track has none.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub fix: Fix,
    pub derived: Option<Derived>,
}

impl TrackPoint {
    pub fn new(fix: Fix) -> Self {
        Self { fix, derived: None }
    }

    pub fn speed(&self) -> Option<f64> {
        self.derived.and_then(|d| d.speed_kmh)
    }

    pub fn elapsed(&self) -> f64 {
        self.derived.map(|d| d.elapsed_s).unwrap_or(0.0)
    }

    pub fn distance(&self) -> Option<f64> {
        self.derived.map(|d| d.distance_m)
    }
}

/// A parsed flight. `takeoffs` and `landings` index into `points` and are only
/// meaningful for the sequence they were detected on.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tracklog {
    pub name: String,
    pub pilot: Option<String>,
    pub date: Option<NaiveDate>,
    pub points: Vec<TrackPoint>,
    pub takeoffs: Vec<usize>,
    pub landings: Vec<usize>,
}

impl Tracklog {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn fixes(&self) -> impl Iterator<Item = &Fix> {
        self.points.iter().map(|p| &p.fix)
    }

    /// Fixes at the detected takeoff indices.
    pub fn takeoff_fixes(&self) -> Vec<Fix> {
        self.takeoffs
            .iter()
            .filter_map(|&i| self.points.get(i).map(|p| p.fix))
            .collect()
    }

    pub fn landing_fixes(&self) -> Vec<Fix> {
        self.landings
            .iter()
            .filter_map(|&i| self.points.get(i).map(|p| p.fix))
            .collect()
    }

    /// Replace the points with freshly derived ones. Any detected events are
    /// dropped since their indices no longer apply.
    pub fn with_derived_metrics(mut self) -> Self {
        let fixes: Vec<Fix> = self.fixes().copied().collect();
        self.points = derive_metrics(&fixes);
        self.takeoffs.clear();
        self.landings.clear();
        self
    }

    pub fn with_noise_filtered(mut self, params: &NoiseParams) -> Self {
        let before = self.points.len();
        self.points = filter_noise(&self.points, params);
        tracing::debug!(
            track = %self.name,
            removed = before - self.points.len(),
            kept = self.points.len(),
            "noise filter applied"
        );
        self.takeoffs.clear();
        self.landings.clear();
        self
    }
}

/// Attach distance, elapsed time and speed to every fix after the first,
/// each measured against its immediate predecessor.
pub fn derive_metrics(fixes: &[Fix]) -> Vec<TrackPoint> {
    let mut out = Vec::with_capacity(fixes.len());
    if let Some(first) = fixes.first() {
        out.push(TrackPoint::new(*first));
    }
    for w in fixes.windows(2) {
        out.push(TrackPoint {
            fix: w[1],
            derived: Some(Derived::between(&w[0], &w[1])),
        });
    }
    out
}

/// Whether the point at `idx` looks like a sensor glitch.
///
/// The first point is always kept. Any later point without a speed (zero
/// elapsed time, e.g. a repeated record) is dropped. The speed-jump check
/// compares against the preceding point of the same (unfiltered) slice, or
/// the point itself at index 0.
pub fn is_noise(points: &[TrackPoint], idx: usize, params: &NoiseParams) -> bool {
    let point = &points[idx];
    let Some(derived) = point.derived else {
        return false;
    };
    if derived.distance_m >= params.max_distance_m {
        return true;
    }
    let Some(speed) = derived.speed_kmh else {
        return true;
    };
    if speed >= params.max_speed_kmh {
        return true;
    }
    match points[idx.saturating_sub(1)].speed() {
        Some(prev) => speed - prev >= params.max_speed_jump_kmh,
        None => false,
    }
}

/// Single pass over `points`, keeping survivors in order. Derived metrics are
/// not recomputed, so survivors still describe their original neighbors.
pub fn filter_noise(points: &[TrackPoint], params: &NoiseParams) -> Vec<TrackPoint> {
    (0..points.len())
        .filter(|&i| !is_noise(points, i, params))
        .map(|i| points[i])
        .collect()
}
