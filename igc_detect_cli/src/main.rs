use std::fs::{self, File};
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::SecondsFormat;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use igc_detect::{
    collect_takeoffs, probe, process_parsed, write_gpx, Fix, IgcParser, Params, Tracklog,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "IGC takeoff and landing detection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect takeoffs and landings in one or more IGC files
    Detect(DetectArgs),
    /// Dump the filtered fixes of one IGC file with derived metrics
    Fixes(FixesArgs),
    /// Show what the detectors see around one fix index
    Diagnose(DiagnoseArgs),
}

#[derive(Parser, Debug)]
struct CommonArgs {
    /// JSON file overriding detection parameters
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct DetectArgs {
    /// IGC files to ingest
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Write deduplicated takeoff waypoints to this GPX file
    #[arg(long, value_hint = ValueHint::FilePath)]
    gpx: Option<PathBuf>,

    /// Waypoint name used in the GPX output
    #[arg(long)]
    label: Option<String>,

    /// Takeoffs closer than this many meters are merged in the GPX output
    #[arg(long)]
    dedup_radius: Option<f64>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FixFormat {
    Csv,
    Json,
}

#[derive(Parser, Debug)]
struct FixesArgs {
    /// IGC file to read
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = FixFormat::Csv)]
    format: FixFormat,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct DiagnoseArgs {
    /// IGC file to read
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Index into the filtered fix sequence
    #[arg(long)]
    index: usize,

    /// Number of neighbouring fixes to print on each side
    #[arg(long, default_value_t = 16)]
    context: usize,

    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Detect(args) => args.common.verbose,
        Command::Fixes(args) => args.common.verbose,
        Command::Diagnose(args) => args.common.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Detect(args) => handle_detect(args),
        Command::Fixes(args) => handle_fixes(args),
        Command::Diagnose(args) => handle_diagnose(args),
    }
}

fn load_params(common: &CommonArgs) -> Result<Params> {
    let Some(path) = common.params.as_ref() else {
        return Ok(Params::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read params {}", path.display()))?;
    Params::from_json(&text).with_context(|| format!("invalid params in {}", path.display()))
}

fn track_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn load_track(path: &Path, params: &Params) -> Result<Tracklog> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = IgcParser::new(track_name(path)).parse(&text);
    if !parsed.rejected.is_empty() {
        warn!(
            "{}: skipped {} malformed record(s)",
            path.display(),
            parsed.rejected.len()
        );
    }
    Ok(process_parsed(parsed.tracklog, params))
}

fn handle_detect(args: DetectArgs) -> Result<()> {
    let mut params = load_params(&args.common)?;
    if let Some(label) = args.label.as_ref() {
        params.waypoint_label = label.clone();
    }
    if let Some(radius) = args.dedup_radius {
        params.dedup_radius_m = radius;
    }
    params.validate()?;

    // One independent pipeline per file; collect keeps input order.
    let t_process = Instant::now();
    let tracks: Vec<Tracklog> = args
        .inputs
        .par_iter()
        .map(|path| load_track(path, &params))
        .collect::<Result<Vec<_>>>()?;
    if args.common.verbose {
        info!(
            "Process stage: {:.1} ms ({} files)",
            t_process.elapsed().as_secs_f64() * 1000.0,
            tracks.len()
        );
    }

    for track in &tracks {
        if track.takeoffs.is_empty() && track.landings.is_empty() {
            warn!("{}: no flights detected ({} fixes)", track.name, track.len());
        } else {
            info!(
                "{}: {} takeoff(s), {} landing(s)",
                track.name,
                track.takeoffs.len(),
                track.landings.len()
            );
        }
    }

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        write_events(&tracks, csv::Writer::from_writer(stdout.lock()))?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        write_events(&tracks, csv::Writer::from_writer(file))?;
        info!("Wrote events CSV: {}", args.output.display());
    }

    if let Some(path) = args.gpx.as_ref() {
        let takeoffs = collect_takeoffs(&tracks, params.dedup_radius_m);
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        write_gpx(&takeoffs, &params.waypoint_label, io::BufWriter::new(file))
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote {} takeoff waypoint(s): {}", takeoffs.len(), path.display());
    }

    Ok(())
}

fn format_time(fix: &Fix) -> String {
    fix.time()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn write_events<W: Write>(tracks: &[Tracklog], mut writer: csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "file",
        "event",
        "index",
        "time",
        "latitude",
        "longitude",
        "altitude_m",
    ])?;
    for track in tracks {
        let events = track
            .takeoffs
            .iter()
            .map(|&i| ("takeoff", i))
            .chain(track.landings.iter().map(|&i| ("landing", i)));
        for (kind, index) in events {
            let Some(point) = track.points.get(index) else {
                continue;
            };
            let fix = &point.fix;
            writer.write_record([
                track.name.clone(),
                kind.to_string(),
                index.to_string(),
                format_time(fix),
                format!("{:.6}", fix.latitude),
                format!("{:.6}", fix.longitude),
                fix.altitude.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct FixRow {
    index: usize,
    time: String,
    latitude: f64,
    longitude: f64,
    altitude_m: i32,
    distance_m: Option<f64>,
    elapsed_s: Option<f64>,
    speed_kmh: Option<f64>,
}

fn fix_rows(track: &Tracklog) -> Vec<FixRow> {
    track
        .points
        .iter()
        .enumerate()
        .map(|(index, p)| FixRow {
            index,
            time: format_time(&p.fix),
            latitude: p.fix.latitude,
            longitude: p.fix.longitude,
            altitude_m: p.fix.altitude,
            distance_m: p.derived.map(|d| d.distance_m),
            elapsed_s: p.derived.map(|d| d.elapsed_s),
            speed_kmh: p.speed(),
        })
        .collect()
}

fn handle_fixes(args: FixesArgs) -> Result<()> {
    let params = load_params(&args.common)?;
    let track = load_track(&args.input, &params)?;
    let rows = fix_rows(&track);

    let out: Box<dyn Write> = if args.output.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(&args.output)
                .with_context(|| format!("failed to create {}", args.output.display()))?,
        )
    };

    match args.format {
        FixFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            for row in &rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        FixFormat::Json => {
            let mut out = out;
            serde_json::to_writer_pretty(&mut out, &rows)?;
            writeln!(out)?;
        }
    }
    info!("{}: {} fixes after filtering", track.name, rows.len());
    Ok(())
}

fn handle_diagnose(args: DiagnoseArgs) -> Result<()> {
    let params = load_params(&args.common)?;
    let track = load_track(&args.input, &params)?;
    let p = probe(&track.points, args.index, &params).ok_or_else(|| {
        anyhow!(
            "index {} out of range ({} fixes after filtering)",
            args.index,
            track.len()
        )
    })?;

    let mut report = String::new();
    report.push_str(&format!("FILE: {}\n", args.input.display()));
    report.push_str(&format!("  fixes: {}\n", track.len()));
    report.push_str(&format!("  index: {}\n", p.index));
    report.push_str(&format!("  speed_kmh: {}\n", fmt_opt(p.speed_kmh)));
    report.push_str(&format!("  delta_kmh: {}\n", fmt_opt(p.speed_delta_kmh)));
    for (name, w) in [
        ("takeoff_before", p.takeoff_before),
        ("takeoff_after", p.takeoff_after),
        ("landing_before", p.landing_before),
        ("landing_after", p.landing_after),
    ] {
        report.push_str(&format!(
            "  {}: avg={:.2} km/h samples={} elapsed={:.1}s\n",
            name, w.speed_kmh, w.samples, w.elapsed_s
        ));
    }
    report.push_str(&format!(
        "  takeoff: {}  landing: {}\n",
        p.is_takeoff, p.is_landing
    ));

    report.push_str("  nearby:\n");
    let nearby = context_range(args.index, args.context, track.len());
    let start = nearby.start;
    for (i, point) in track.points[nearby].iter().enumerate() {
        let idx = start + i;
        report.push_str(&format!(
            "   {} {:>6} {} dist={} elapsed={:.1} speed={}\n",
            if idx == args.index { '>' } else { ' ' },
            idx,
            format_time(&point.fix),
            fmt_opt(point.distance()),
            point.elapsed(),
            fmt_opt(point.speed())
        ));
    }

    print!("{report}");
    Ok(())
}

/// Indices within `context` of `index`, clamped to a track of `len` fixes.
fn context_range(index: usize, context: usize, len: usize) -> Range<usize> {
    let start = index.saturating_sub(context).min(len);
    let end = index.saturating_add(context).saturating_add(1).min(len);
    start..end
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or("n/a".into(), |v| format!("{:.2}", v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track() -> Tracklog {
        let mut text = String::from("HFDTE240618\n");
        for s in 0..5u32 {
            text.push_str(&format!(
                "B1200{:02}42{:05}N00633000EA0100001200\n",
                s,
                10_000 + s * 5
            ));
        }
        let parsed = IgcParser::new("sample.igc").parse(&text);
        let mut track = process_parsed(parsed.tracklog, &Params::default());
        track.takeoffs = vec![1];
        track.landings = vec![3];
        track
    }

    #[test]
    fn events_csv_lists_takeoffs_then_landings() {
        let mut buf = Vec::new();
        write_events(&[sample_track()], csv::Writer::from_writer(&mut buf)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("sample.igc,takeoff,1,2018-06-24T12:00:01Z"));
        assert!(lines[2].starts_with("sample.igc,landing,3,"));
    }

    #[test]
    fn fix_rows_leave_first_metrics_empty() {
        let rows = fix_rows(&sample_track());
        assert_eq!(rows.len(), 5);
        assert!(rows[0].speed_kmh.is_none());
        assert!(rows[1].speed_kmh.unwrap() > 30.0);
    }

    #[test]
    fn params_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        fs::write(&path, r#"{ "dedup_radius_m": 250 }"#).unwrap();
        let params = load_params(&CommonArgs {
            params: Some(path),
            verbose: false,
        })
        .unwrap();
        assert_eq!(params.dedup_radius_m, 250.0);
    }

    #[test]
    fn track_name_is_file_name() {
        assert_eq!(track_name(Path::new("/tmp/logs/a.igc")), "a.igc");
    }

    #[test]
    fn context_range_is_clamped() {
        assert_eq!(context_range(3, 16, 5), 0..5);
        assert_eq!(context_range(10, 2, 100), 8..13);
        assert_eq!(context_range(4, usize::MAX, 5), 0..5);
        assert_eq!(context_range(usize::MAX, 1, 5), 5..5);
    }

    #[test]
    fn detect_requires_an_input() {
        assert!(Cli::try_parse_from(["igc-detect", "detect"]).is_err());
    }

    #[test]
    fn cli_parses_detect_arguments() {
        let cli = Cli::try_parse_from([
            "igc-detect",
            "detect",
            "a.igc",
            "b.igc",
            "--gpx",
            "out.gpx",
            "--label",
            "Launch",
        ])
        .unwrap();
        match cli.command {
            Command::Detect(args) => {
                assert_eq!(args.inputs.len(), 2);
                assert_eq!(args.label.as_deref(), Some("Launch"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
