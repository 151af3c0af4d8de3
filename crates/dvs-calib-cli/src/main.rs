use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dvs_calib_core::{
    synthetic::{self, PixelNoise},
    BrownConrady5, CameraIntrinsics, CameraModel, PinholeCamera,
};
use dvs_calib_node::{
    replay, CalibrationSession, JsonFileCameraInfoStore, PlanarSolver, RecordedDetector,
    RecordingSink, ReplayEvent, ReplayReport, ReplayScript, SessionConfig,
};
use log::{info, LevelFilter};
use serde::Serialize;

/// Calibration of a DVS camera from recorded pattern detections.
#[derive(Debug, Parser)]
#[command(author, version, about = "DVS mono camera calibration")]
struct Cli {
    /// Log debug output (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay an event script through a calibration session.
    Replay(ReplayArgs),
    /// Write an event script with synthetic detections.
    Synthesize(SynthesizeArgs),
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// Path to the JSON event script.
    #[arg(long)]
    events: PathBuf,

    /// Optional path to a JSON SessionConfig. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera-info file read on `load_camera_info` and written on `commit`.
    #[arg(long, default_value = "camera_info.json")]
    camera_info: PathBuf,

    /// Exit with an error if any event failed.
    #[arg(long)]
    strict: bool,
}

#[derive(Debug, Args)]
struct SynthesizeArgs {
    #[arg(long, default_value_t = 8)]
    views: usize,

    /// Uniform pixel noise amplitude.
    #[arg(long, default_value_t = 0.1)]
    noise: f64,

    #[arg(long, default_value_t = 150.0)]
    focal: f64,

    /// Optional path to a JSON SessionConfig (pattern and sensor size).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    #[serde(flatten)]
    report: ReplayReport,
    camera_info: Option<CameraModel>,
    published: usize,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let config = match path {
        Some(path) => load_json_file::<SessionConfig>(path)?,
        None => SessionConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn run_replay(args: &ReplayArgs) -> Result<String> {
    let config = load_config(args.config.as_deref())?;
    let script: ReplayScript = load_json_file(&args.events)?;
    info!(
        "replaying {} events for camera {} ({})",
        script.events.len(),
        config.camera_id,
        config.resolution()
    );

    let camera_id = config.camera_id;
    let detector = RecordedDetector::new(config.sensor_width, config.sensor_height);
    let solver = PlanarSolver::from_config(&config);
    let camera_info = JsonFileCameraInfoStore::new(&args.camera_info);
    camera_info
        .load()
        .context("existing camera info is unusable; fix or remove it")?;
    let mut session =
        CalibrationSession::new(config, solver, camera_info, RecordingSink::default());
    session.register_camera(camera_id, detector);

    let report = replay(&mut session, &script.events);
    let failures = report.failures().count();
    if args.strict && failures > 0 {
        bail!("{failures} of {} events failed", script.events.len());
    }

    let output = ReplayOutput {
        report,
        camera_info: session.last_model().cloned(),
        published: session.publisher().sink().camera_infos.len(),
    };
    Ok(serde_json::to_string_pretty(&output)?)
}

fn run_synthesize(args: &SynthesizeArgs) -> Result<String> {
    let config = load_config(args.config.as_deref())?;
    let camera = PinholeCamera::new(
        CameraIntrinsics {
            fx: args.focal,
            fy: args.focal,
            cx: config.sensor_width as f64 / 2.0,
            cy: config.sensor_height as f64 / 2.0,
            skew: 0.0,
        },
        BrownConrady5::default(),
    );

    let board = config.pattern.world_points();
    // Pattern spans about half the sensor.
    let pattern = config.pattern;
    let extent = (pattern.cols.max(pattern.rows) - 1) as f64 * pattern.spacing;
    let half_sensor = 0.5 * config.sensor_width.min(config.sensor_height) as f64;
    let distance = args.focal * extent / half_sensor;
    let poses = synthetic::poses_tilted_around_board(&board, args.views, 0.35, distance);
    let mut views = synthetic::project_views(&camera, &board, &poses)?;
    PixelNoise {
        seed: 1,
        max_abs_px: args.noise,
    }
    .apply(&mut views);

    let mut events: Vec<_> = views
        .into_iter()
        .map(|view| ReplayEvent::Detection {
            camera_id: config.camera_id,
            points: view.image_points,
        })
        .collect();
    events.push(ReplayEvent::Start);
    events.push(ReplayEvent::Commit);

    Ok(serde_json::to_string_pretty(&ReplayScript { events })?)
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    );
    if cli.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    let json = match &cli.command {
        Command::Replay(args) => run_replay(args)?,
        Command::Synthesize(args) => run_synthesize(args)?,
    };
    println!("{json}");
    Ok(())
}
