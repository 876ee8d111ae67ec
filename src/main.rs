//! Offline estimator node.
//!
//! Replays a recorded frame stream (JSON) through the estimator,
//! printing one pose per frame and optionally saving the final map.
//!
//! Exit codes: 0 success, 1 configuration error, 2 input-format error,
//! 3 unrecoverable estimator failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Deserialize;

use draksha_slam::{Estimator, FrameInput, Point3, Pose6, SlamConfig, SlamError};

#[derive(Parser, Debug)]
#[command(name = "draksha-slam-node", about = "Offline multi-layer SLAM replay")]
struct Cli {
    /// Recorded frame stream (JSON array of frames).
    frames: PathBuf,

    /// YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the final map here.
    #[arg(long)]
    save_map: Option<PathBuf>,

    /// Load a prior map before processing (localization-only runs).
    #[arg(long)]
    load_map: Option<PathBuf>,
}

/// One recorded frame: odometry plus whatever sensors were logged.
#[derive(Debug, Deserialize)]
struct FrameRecord {
    timestamp: f64,
    odometry: Pose6,
    #[serde(default)]
    cloud: Vec<Point3>,
    #[serde(default)]
    gnss: Option<Pose6>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            let code = match e {
                SlamError::Config(_) => 1,
                SlamError::Format(_) | SlamError::Io(_) => 2,
                SlamError::EstimatorFailed(_) => 3,
                _ => 3,
            };
            ExitCode::from(code)
        }
    }
}

fn run(cli: &Cli) -> Result<(), SlamError> {
    let config = match &cli.config {
        Some(path) => SlamConfig::load(path)?,
        None => SlamConfig::default(),
    };

    let frames = load_frames(&cli.frames)?;
    log::info!("{} frames loaded from {}", frames.len(), cli.frames.display());

    let mut estimator = Estimator::new(&config)?;
    if let Some(path) = &cli.load_map {
        estimator.load_map(path)?;
        log::info!("prior map loaded from {}", path.display());
    }

    for record in &frames {
        let input = FrameInput {
            timestamp: record.timestamp,
            odometry: record.odometry,
            cloud: (!record.cloud.is_empty()).then_some(record.cloud.as_slice()),
            camera: None,
            detections: &[],
            gnss: record.gnss,
        };
        let output = estimator.process(&input)?;
        let p = output.pose;
        println!(
            "{:.6} {:.4} {:.4} {:.4} {:.4} {:.4} {:.4}",
            record.timestamp, p.x, p.y, p.z, p.roll, p.pitch, p.yaw
        );
    }

    if let Some(path) = &cli.save_map {
        estimator.save_map(path)?;
        log::info!("map saved to {}", path.display());
    }

    Ok(())
}

fn load_frames(path: &PathBuf) -> Result<Vec<FrameRecord>, SlamError> {
    let file = std::fs::File::open(path)?;
    let frames: Vec<FrameRecord> = serde_json::from_reader(std::io::BufReader::new(file))?;
    if frames.is_empty() {
        return Err(SlamError::Format("frame stream is empty".into()));
    }
    Ok(frames)
}
