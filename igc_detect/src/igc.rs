//! IGC flight recorder text parsing.
//!
//! Only three record kinds matter here:
//! - `HFDTE` / `HFDTEDATE:` header, giving the UTC date of the first fix
//! - `HFPLTPILOT` / `HOPLTPILOT` header, giving the pilot name
//! - `B` records, one fix each, in fixed columns:
//!
//! ```text
//! B HHMMSS DDMMmmmN DDDMMmmmW A PPPPP GGGGG
//! B 144820 4247731N 00033427W A 00000 02526
//! ```
//!
//! Everything else is ignored. Bad B or date records are skipped with a
//! warning; a log with no usable fixes is simply empty.

use std::sync::OnceLock;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use regex::{Captures, Regex};

use crate::tracklog::{Fix, TrackPoint, Tracklog};

/// A record that was skipped while parsing. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("line {line}: malformed B record: {text}")]
    MalformedFix { line: usize, text: String },
    #[error("line {line}: malformed date record: {text}")]
    MalformedDate { line: usize, text: String },
    #[error("line {line}: invalid time of day {hours:02}:{minutes:02}:{seconds:02}")]
    InvalidTime {
        line: usize,
        hours: u32,
        minutes: u32,
        seconds: u32,
    },
}

impl RecordError {
    pub fn line(&self) -> usize {
        match self {
            RecordError::MalformedFix { line, .. }
            | RecordError::MalformedDate { line, .. }
            | RecordError::InvalidTime { line, .. } => *line,
        }
    }
}

fn fix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // time, lat deg/min/hemi, lon deg/min/hemi, validity, baro alt, gps alt
        Regex::new(
            r"^B(\d{2})(\d{2})(\d{2})(\d{2})(\d{5})([NS])(\d{3})(\d{5})([EW])([AV])(-\d{4}|\d{5})(-\d{4}|\d{5})",
        )
        .unwrap()
    })
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(HFDTE|HFDTEDATE:)(\d{2})(\d{2})(\d{2})").unwrap())
}

fn pilot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(HFPLTPILOT|HOPLTPILOT)[^:]*:(.*)").unwrap())
}

/// Parser output: the track plus every record that was skipped.
#[derive(Debug, Clone)]
pub struct ParsedIgc {
    pub tracklog: Tracklog,
    pub rejected: Vec<RecordError>,
}

/// Line-at-a-time IGC parser.
///
/// The reference time starts at midnight of the header date (or the fallback
/// date) and is replaced by every accepted fix, so a time of day that goes
/// backwards is read as the next calendar day.
#[derive(Debug)]
pub struct IgcParser {
    fallback_date: NaiveDate,
    reference: Option<DateTime<Utc>>,
    line: usize,
    tracklog: Tracklog,
    rejected: Vec<RecordError>,
}

impl IgcParser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            fallback_date: Utc::now().date_naive(),
            reference: None,
            line: 0,
            tracklog: Tracklog::new(name),
            rejected: Vec::new(),
        }
    }

    /// Date used when the log has no date header.
    pub fn with_fallback_date(mut self, date: NaiveDate) -> Self {
        self.fallback_date = date;
        self
    }

    pub fn parse(mut self, text: &str) -> ParsedIgc {
        // `lines` accepts both "\n" and "\r\n".
        for line in text.lines() {
            self.push_line(line);
        }
        self.finish()
    }

    pub fn push_line(&mut self, line: &str) {
        self.line += 1;
        if line.starts_with("HFDTE") {
            self.accept_date(line);
        } else if line.starts_with('B') {
            self.accept_fix(line);
        } else if let Some(caps) = pilot_pattern().captures(line) {
            let pilot = caps[2].trim();
            if !pilot.is_empty() {
                self.tracklog.pilot = Some(pilot.to_string());
            }
        }
    }

    pub fn finish(self) -> ParsedIgc {
        if !self.rejected.is_empty() {
            tracing::info!(
                track = %self.tracklog.name,
                skipped = self.rejected.len(),
                fixes = self.tracklog.points.len(),
                "parsed with skipped records"
            );
        }
        ParsedIgc {
            tracklog: self.tracklog,
            rejected: self.rejected,
        }
    }

    fn reject(&mut self, err: RecordError) {
        tracing::warn!(track = %self.tracklog.name, "{}", err);
        self.rejected.push(err);
    }

    fn accept_date(&mut self, line: &str) {
        let date = date_pattern().captures(line).and_then(|caps| {
            let day = caps[2].parse().ok()?;
            let month = caps[3].parse().ok()?;
            let year: i32 = caps[4].parse().ok()?;
            NaiveDate::from_ymd_opt(2000 + year, month, day)
        });
        match date {
            Some(date) => {
                self.tracklog.date = Some(date);
                self.reference = Some(date.and_time(NaiveTime::MIN).and_utc());
            }
            None => self.reject(RecordError::MalformedDate {
                line: self.line,
                text: line.to_string(),
            }),
        }
    }

    fn accept_fix(&mut self, line: &str) {
        let Some(caps) = fix_pattern().captures(line) else {
            self.reject(RecordError::MalformedFix {
                line: self.line,
                text: line.to_string(),
            });
            return;
        };
        let (hours, minutes, seconds) = (field(&caps, 1), field(&caps, 2), field(&caps, 3));
        let Some(time_of_day) = NaiveTime::from_hms_opt(hours, minutes, seconds) else {
            self.reject(RecordError::InvalidTime {
                line: self.line,
                hours,
                minutes,
                seconds,
            });
            return;
        };

        let reference = self
            .reference
            .unwrap_or_else(|| self.fallback_date.and_time(NaiveTime::MIN).and_utc());
        let mut time = reference.date_naive().and_time(time_of_day).and_utc();
        if time < reference {
            match time.checked_add_days(Days::new(1)) {
                Some(next) => time = next,
                None => {
                    self.reject(RecordError::MalformedFix {
                        line: self.line,
                        text: line.to_string(),
                    });
                    return;
                }
            }
            tracing::debug!(
                track = %self.tracklog.name,
                index = self.tracklog.points.len(),
                "day rollover detected"
            );
        }
        self.reference = Some(time);

        let fix = Fix {
            latitude: degrees(field(&caps, 4), field(&caps, 5), &caps[6] == "S"),
            longitude: degrees(field(&caps, 7), field(&caps, 8), &caps[9] == "W"),
            baro_altitude: caps[11].parse().unwrap_or(0),
            altitude: caps[12].parse().unwrap_or(0),
            time_ms: time.timestamp_millis(),
        };
        self.tracklog.points.push(TrackPoint::new(fix));
    }
}

/// All-digit capture groups never fail to parse.
fn field(caps: &Captures<'_>, idx: usize) -> u32 {
    caps[idx].parse().unwrap_or(0)
}

fn degrees(deg: u32, min_thousandths: u32, negative: bool) -> f64 {
    let value = deg as f64 + min_thousandths as f64 / 60_000.0;
    if negative {
        -value
    } else {
        value
    }
}

/// Parse a whole log, falling back to today's date if it has no date header.
pub fn parse_igc(name: &str, text: &str) -> ParsedIgc {
    IgcParser::new(name).parse(text)
}

/// Encode a fix as a B record (validity `A`).
pub fn encode_fix_record(fix: &Fix) -> String {
    let time = fix.time().unwrap_or_default();
    let (lat_deg, lat_min) = split_degrees(fix.latitude);
    let (lon_deg, lon_min) = split_degrees(fix.longitude);
    format!(
        "B{}{:02}{:05}{}{:03}{:05}{}A{}{}",
        time.format("%H%M%S"),
        lat_deg,
        lat_min,
        if fix.latitude < 0.0 { 'S' } else { 'N' },
        lon_deg,
        lon_min,
        if fix.longitude < 0.0 { 'W' } else { 'E' },
        encode_altitude(fix.baro_altitude),
        encode_altitude(fix.altitude),
    )
}

fn split_degrees(value: f64) -> (u32, u32) {
    let thousandths = (value.abs() * 60_000.0).round() as u64;
    ((thousandths / 60_000) as u32, (thousandths % 60_000) as u32)
}

fn encode_altitude(meters: i32) -> String {
    if meters < 0 {
        format!("-{:04}", meters.unsigned_abs().min(9999))
    } else {
        format!("{:05}", meters.min(99_999))
    }
}
