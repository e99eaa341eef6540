//! Stream Viewer Application
//!
//! Connects to a streamer and reports what arrives. Optionally keeps the
//! last frame as a snapshot.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_mjpeg_streamer::{
    constants::{DEFAULT_PORT, STREAM_PATH},
    network::StreamClient,
};

/// How long to wait for the stream to open
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "viewer", version, about = "Watch an MJPEG stream from the command line")]
struct Cli {
    /// Server as HOST[:PORT].
    #[arg(default_value = "127.0.0.1")]
    address: String,

    /// Stream path on the server.
    #[arg(long, default_value = STREAM_PATH)]
    path: String,

    /// Seconds between stats reports.
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Save the last received frame to this file on exit.
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,
}

/// Split `HOST[:PORT]`, defaulting the port
fn split_address(raw: &str) -> Result<(String, u16)> {
    let raw = raw.trim();
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("cannot read port '{}', expected HOST[:PORT]", port))?;
            if host.is_empty() {
                bail!("missing host in '{}'", raw);
            }
            Ok((host.to_string(), port))
        }
        _ => Ok((raw.to_string(), DEFAULT_PORT)),
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
    let (host, port) = split_address(&cli.address)?;

    let mut client = match tokio::time::timeout(
        CONNECT_TIMEOUT,
        StreamClient::connect(format!("{}:{}", host, port), &cli.path),
    )
    .await
    {
        Ok(Ok(client)) => client,
        Ok(Err(e)) => bail!("Unable to open stream at {}:{}: {}", host, port, e),
        Err(_) => bail!("Timed out connecting to stream at {}:{}", host, port),
    };
    tracing::info!("Connected to http://{}:{}{}", host, port, cli.path);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut report = tokio::time::interval(Duration::from_secs(cli.interval.max(1)));
    report.tick().await;

    let mut last_frame: Option<Bytes> = None;

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            frame = client.next_frame() => match frame {
                Ok(Some(frame)) => {
                    tracing::debug!("Frame: {} bytes", frame.len());
                    last_frame = Some(frame);
                }
                Ok(None) => {
                    tracing::info!("Stream ended by server");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            },
            _ = report.tick() => {
                let stats = client.stats();
                tracing::info!(
                    "Stats: {} frames, {:.1} fps, {:.1} KB received, last frame {} bytes",
                    stats.frames_received,
                    stats.fps(),
                    stats.bytes_received as f64 / 1024.0,
                    last_frame.as_ref().map_or(0, |f| f.len())
                );
            }
        }
    };

    if let (Some(path), Some(frame)) = (&cli.snapshot, &last_frame) {
        std::fs::write(path, frame)
            .with_context(|| format!("cannot write snapshot {}", path.display()))?;
        tracing::info!("Saved snapshot to {}", path.display());
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_with_and_without_port() {
        assert_eq!(split_address("10.0.0.5").unwrap(), ("10.0.0.5".to_string(), 8000));
        assert_eq!(
            split_address("camera.local:9000").unwrap(),
            ("camera.local".to_string(), 9000)
        );
        assert!(split_address("10.0.0.5:abc").is_err());
        assert!(split_address(":9000").is_err());
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["viewer"]).expect("no args should parse");
        assert_eq!(cli.address, "127.0.0.1");
        assert_eq!(cli.path, "/stream.mjpg");
        assert_eq!(cli.interval, 5);
    }
}
