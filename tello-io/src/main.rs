//! Tello IO - Interactive controller for a Tello drone
//!
//! ```text
//! operator ── Command: ──▶ control channel ──▶ vehicle :8889
//!                              ◀── acks (logged) ──┘
//! vehicle :11111 ── H.264 ──▶ video capture ──▶ latest frame
//! ```
//!
//! Type SDK commands at the prompt (`takeoff`, `land`, `battery?`, ...).
//! `q`, end of input or Ctrl-C ends the session with status 0; any channel
//! failure ends it with status 1.

use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tello_io::config::AppConfig;
use tello_io::core::types::{EXIT_FAILURE, ShutdownReason};
use tello_io::error::{Error, Result};
use tello_io::video::create_frame_source;
use tello_io::{SessionController, logging, prompt};

/// Interval between status lines while the session runs
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Host-side controller for UDP-commanded Tello drones
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vehicle command address, e.g. 192.168.10.1:8889
    #[arg(long)]
    vehicle: Option<String>,

    /// Local port for the command socket
    #[arg(long)]
    local_port: Option<u16>,

    /// Local port the video stream arrives on
    #[arg(long)]
    video_port: Option<u16>,

    /// Frame source backend ("ffmpeg" or "synthetic")
    #[arg(long)]
    backend: Option<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(vehicle) = &args.vehicle {
        config.control.vehicle_address = vehicle.clone();
    }
    if let Some(port) = args.local_port {
        config.control.local_port = port;
    }
    if let Some(port) = args.video_port {
        config.video.port = port;
    }
    if let Some(backend) = &args.backend {
        config.video.backend = backend.clone();
    }

    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<i32> {
    let config = load_config(&args)?;
    logging::init(&config.logging.level);

    log::info!("Tello IO v{} starting", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        log::info!("Using config: {}", path.display());
    }
    log::info!(
        "Vehicle: {} (local port {}), video: {} [{}]",
        config.control.vehicle_address,
        config.control.local_port,
        config.video.stream_url(),
        config.video.backend
    );

    if config.video.backend == "synthetic" {
        log::warn!("Using synthetic video; build with --features ffmpeg for the drone camera");
    }
    let source = create_frame_source(&config.video)?;
    let session = SessionController::new(config, source);

    let on_signal = Arc::clone(&session);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        on_signal.shutdown(ShutdownReason::UserRequested("ctrl-c".to_string()));
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    if let Err(e) = session.start() {
        log::error!("Failed to start session: {}", e);
        return Ok(session.wait().exit_code());
    }

    // Blocking stdin read: the thread is left behind when the session ends
    // from elsewhere, and process exit reclaims it.
    let prompt_session = Arc::clone(&session);
    thread::Builder::new()
        .name("operator-prompt".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            if let Err(e) = prompt::run_prompt(&prompt_session, stdin.lock(), io::stdout()) {
                log::error!("Operator prompt failed: {}", e);
                prompt_session.shutdown(ShutdownReason::UserRequested(format!(
                    "prompt closed: {}",
                    e
                )));
            }
        })
        .map_err(|e| Error::Other(format!("Failed to spawn operator prompt: {}", e)))?;

    let reason = loop {
        if let Some(reason) = session.wait_timeout(STATS_INTERVAL) {
            break reason;
        }
        log::info!(
            "Responses: {}, frames: {}",
            session.responses_received(),
            session.frames_captured()
        );
    };

    log::info!("Tello IO stopped: {}", reason);
    Ok(reason.exit_code())
}

fn main() {
    let args = Args::parse();
    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            // Logger may not be up yet when configuration fails
            eprintln!("tello-io: {}", e);
            log::error!("{}", e);
            EXIT_FAILURE
        }
    };
    process::exit(code);
}
