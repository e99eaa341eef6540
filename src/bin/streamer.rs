//! Camera Streamer Application
//!
//! Captures MJPEG from the camera and broadcasts it over HTTP.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_mjpeg_streamer::{
    capture::{CaptureDevice, CaptureSource},
    config::{AppConfig, ConfigOverrides},
    video::buffer::create_shared_buffer,
    web::StreamServer,
};

/// How often the main loop checks the capture thread for failures
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long open streams get to close after shutdown starts
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "streamer", version, about = "Broadcast a camera as MJPEG over HTTP")]
struct Cli {
    /// Listening port.
    #[arg(short, long)]
    port: Option<String>,

    /// Camera resolution as WIDTHxHEIGHT.
    #[arg(short, long)]
    resolution: Option<String>,

    /// Camera framerate.
    #[arg(short, long)]
    framerate: Option<String>,

    /// Image rotation in degrees (multiple of 90).
    #[arg(long)]
    rotation: Option<String>,

    /// Address to listen on.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Configuration file (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read MJPEG from stdin instead of running the camera program.
    #[arg(long)]
    stdin: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind: self.bind.clone(),
            port: self.port.clone(),
            resolution: self.resolution.clone(),
            framerate: self.framerate.clone(),
            rotation: self.rotation.clone(),
            stdin: self.stdin,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load_or_default(cli.config.as_deref());
    config.apply_overrides(&cli.overrides());

    let buffer = create_shared_buffer(config.stream.max_frame_bytes);
    let shutdown = CancellationToken::new();
    let server = StreamServer::with_shutdown(config.clone(), buffer.clone(), shutdown.clone());
    let listener = server.bind()?;

    let mut capture = CaptureDevice::start(
        CaptureSource::from_config(&config),
        buffer.clone(),
        config.stream.max_frame_bytes,
    )?;
    tracing::info!(
        "Camera has started recording: port={}, resolution={}, framerate={}, rotation={}",
        config.server.port,
        config.camera.resolution,
        config.camera.framerate,
        config.camera.rotation
    );

    let mut server_task = tokio::spawn(server.serve(listener));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(CAPTURE_POLL_INTERVAL);

    tracing::info!("Press Ctrl+C to stop");

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, shutting down");
                break Ok(());
            }
            result = &mut server_task => {
                break match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                };
            }
            _ = poll.tick() => {
                if let Some(e) = capture.check_errors() {
                    break Err(e.into());
                }
            }
        }
    };

    shutdown.cancel();
    buffer.close();
    capture.stop();

    if !server_task.is_finished()
        && tokio::time::timeout(SHUTDOWN_GRACE, &mut server_task).await.is_err()
    {
        tracing::warn!("Server did not stop within {:?}", SHUTDOWN_GRACE);
        server_task.abort();
    }

    if let Err(e) = &outcome {
        tracing::error!("Streamer stopped: {}", e);
    }
    outcome
}
