//! Flight recorder (IGC) log processing: parse fixes, derive per-fix speed,
//! drop GPS glitches and detect takeoffs and landings.

pub mod detect;
pub mod geo;
pub mod igc;
pub mod tracklog;
pub mod waypoints;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use detect::{detect_events, probe, window_average, Events, Probe, WindowAverage};
pub use geo::haversine_distance;
pub use igc::{encode_fix_record, parse_igc, IgcParser, ParsedIgc, RecordError};
pub use tracklog::{derive_metrics, filter_noise, Derived, Fix, TrackPoint, Tracklog};
pub use waypoints::{collect_takeoffs, dedup_fixes, write_gpx};

#[derive(Error, Debug)]
pub enum IgcError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to parse parameters: {0}")]
    ParamsParse(String),
    #[error("failed to write GPX: {0}")]
    GpxWrite(String),
}

/// Noise filter thresholds. A point is dropped when any one is reached.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NoiseParams {
    pub max_speed_kmh: f64,
    pub max_distance_m: f64,
    pub max_speed_jump_kmh: f64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            max_speed_kmh: 110.0,
            max_distance_m: 100.0,
            max_speed_jump_kmh: 40.0,
        }
    }
}

/// A speed-averaging window. Negative durations look backward.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct WindowSpec {
    pub duration_s: f64,
    pub min_samples: usize,
}

impl WindowSpec {
    pub const fn new(duration_s: f64, min_samples: usize) -> Self {
        Self {
            duration_s,
            min_samples,
        }
    }
}

/// Stationary before, moving after.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TakeoffParams {
    pub candidate_delta_kmh: f64,
    pub before: WindowSpec,
    pub before_max_kmh: f64,
    pub after: WindowSpec,
    pub after_min_kmh: f64,
}

impl Default for TakeoffParams {
    fn default() -> Self {
        Self {
            candidate_delta_kmh: 5.0,
            before: WindowSpec::new(-60.0, 2),
            before_max_kmh: 2.0,
            after: WindowSpec::new(30.0, 4),
            after_min_kmh: 12.0,
        }
    }
}

/// Moving before, stationary after.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LandingParams {
    pub candidate_delta_kmh: f64,
    pub before: WindowSpec,
    pub before_min_kmh: f64,
    pub after: WindowSpec,
    pub after_max_kmh: f64,
}

impl Default for LandingParams {
    fn default() -> Self {
        Self {
            candidate_delta_kmh: 5.0,
            before: WindowSpec::new(-30.0, 4),
            before_min_kmh: 12.0,
            after: WindowSpec::new(60.0, 2),
            after_max_kmh: 5.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub noise: NoiseParams,
    pub takeoff: TakeoffParams,
    pub landing: LandingParams,
    /// Takeoffs from different tracks closer than this are one site.
    pub dedup_radius_m: f64,
    pub waypoint_label: String,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            noise: NoiseParams::default(),
            takeoff: TakeoffParams::default(),
            landing: LandingParams::default(),
            dedup_radius_m: 100.0,
            waypoint_label: "Takeoff".to_string(),
        }
    }
}

impl Params {
    /// Parse a (possibly partial) JSON object; missing keys keep defaults.
    pub fn from_json(text: &str) -> Result<Self, IgcError> {
        let params: Params =
            serde_json::from_str(text).map_err(|e| IgcError::ParamsParse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), IgcError> {
        let positive = [
            ("noise.max_speed_kmh", self.noise.max_speed_kmh),
            ("noise.max_distance_m", self.noise.max_distance_m),
            ("noise.max_speed_jump_kmh", self.noise.max_speed_jump_kmh),
            ("takeoff.candidate_delta_kmh", self.takeoff.candidate_delta_kmh),
            ("takeoff.before_max_kmh", self.takeoff.before_max_kmh),
            ("takeoff.after_min_kmh", self.takeoff.after_min_kmh),
            ("landing.candidate_delta_kmh", self.landing.candidate_delta_kmh),
            ("landing.before_min_kmh", self.landing.before_min_kmh),
            ("landing.after_max_kmh", self.landing.after_max_kmh),
            ("dedup_radius_m", self.dedup_radius_m),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(IgcError::InvalidParameter(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        let windows = [
            ("takeoff.before", self.takeoff.before, false),
            ("takeoff.after", self.takeoff.after, true),
            ("landing.before", self.landing.before, false),
            ("landing.after", self.landing.after, true),
        ];
        for (name, spec, forward) in windows {
            let ok = spec.duration_s.is_finite()
                && if forward {
                    spec.duration_s > 0.0
                } else {
                    spec.duration_s < 0.0
                };
            if !ok {
                return Err(IgcError::InvalidParameter(format!(
                    "{name}.duration_s has the wrong sign or is not finite: {}",
                    spec.duration_s
                )));
            }
        }
        Ok(())
    }
}

/// Run the whole pipeline on one log: parse, derive, filter, detect.
///
/// Skipped records are logged by the parser; use [`IgcParser`] directly to
/// inspect them.
pub fn process_igc(name: &str, text: &str, params: &Params) -> Tracklog {
    process_parsed(parse_igc(name, text).tracklog, params)
}

/// The post-parse stages, for callers that built their own [`IgcParser`].
pub fn process_parsed(tracklog: Tracklog, params: &Params) -> Tracklog {
    let mut tracklog = tracklog
        .with_derived_metrics()
        .with_noise_filtered(&params.noise);
    let events = detect_events(&tracklog.points, params);
    tracing::debug!(
        track = %tracklog.name,
        fixes = tracklog.points.len(),
        takeoffs = events.takeoffs.len(),
        landings = events.landings.len(),
        "detection finished"
    );
    tracklog.takeoffs = events.takeoffs;
    tracklog.landings = events.landings;
    tracklog
}
