use anyhow::{Context, Result};
use clap::Parser;
use handcal_client::{connect_with_retry, ControlChannel, ReplaySensor, Session, SessionConfig};
use handcal_detector::HandDetector;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause between connection attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about = "Hand sensor to headset camera calibration", long_about = None)]
struct Args {
    /// Display peer address (e.g., 192.168.1.20:12345)
    #[arg(short, long)]
    peer: String,

    /// Classifier parameter file produced by the trainer
    #[arg(short, long, default_value = "calibration_data.txt")]
    model: PathBuf,

    /// JSON-lines recording of sensor frames to replay
    #[arg(short, long)]
    sensor_replay: PathBuf,

    /// Session config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write every captured image and its mask here
    #[arg(long)]
    debug_dir: Option<PathBuf>,

    /// How many times to try reaching the peer
    #[arg(long, default_value_t = 5)]
    connect_attempts: u32,

    /// Give up when the peer is silent this long
    #[arg(long)]
    read_timeout_secs: Option<u64>,
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if args.debug_dir.is_some() {
        config.debug_dir = args.debug_dir.clone();
    }
    if args.read_timeout_secs.is_some() {
        config.read_timeout_secs = args.read_timeout_secs;
    }
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    if args.debug {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    log::info!("Calibration client starting...");
    log::info!("Peer: {}", args.peer);
    log::info!("Model: {}", args.model.display());

    let config = load_config(&args)?;
    let detector = HandDetector::load(&args.model, config.detector)
        .context("Failed to load classifier model")?;
    let sensor = ReplaySensor::open(&args.sensor_replay)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling session");
            on_signal.cancel();
        }
    });

    let stream = connect_with_retry(&args.peer, args.connect_attempts, CONNECT_RETRY_DELAY, &cancel).await?;
    let channel = ControlChannel::new(stream, cancel).with_read_timeout(config.read_timeout());

    let report = Session::new(channel, sensor, detector, &config)
        .run()
        .await
        .context("Calibration session failed")?;

    match report.result {
        Some(result) => log::info!(
            "Session {} after {} attempts, last result {:?}",
            report.state.name(),
            report.attempts,
            result
        ),
        None => log::info!("Session {} without a new calibration", report.state.name()),
    }

    Ok(())
}
