//! Application configuration
//!
//! Values come from an optional TOML file and are then overridden by
//! command-line flags. Every raw value goes through a lenient validator:
//! anything malformed is logged as a warning and replaced by its documented
//! default, so configuration problems never stop the server from starting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Capture resolution, serialized as `WIDTHxHEIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `WIDTHxHEIGHT` string, falling back to 640x480 with a warning
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.parse() {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!(
                    "{}; resolution must have the form 'WIDTHxHEIGHT', defaulting to {}",
                    e,
                    Self::default()
                );
                Self::default()
            }
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| Error::Config(format!("invalid resolution '{}'", s)))?;

        let parse_dim = |part: &str| -> Result<u32> {
            match part.trim().parse::<u32>() {
                Ok(v) if v > 0 => Ok(v),
                _ => Err(Error::Config(format!("invalid resolution '{}'", s))),
            }
        };

        Ok(Self::new(parse_dim(w)?, parse_dim(h)?))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<String> for Resolution {
    fn from(raw: String) -> Self {
        Self::parse_or_default(&raw)
    }
}

impl From<Resolution> for String {
    fn from(resolution: Resolution) -> Self {
        resolution.to_string()
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind (all interfaces by default)
    pub bind_address: IpAddr,
    /// Listening port, 0 picks an ephemeral port
    pub port: u16,
    /// Close a streaming client that cannot accept a frame within this
    /// many milliseconds. Unset means no limit.
    pub write_timeout_ms: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            write_timeout_ms: None,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Camera settings handed to the capture source and the landing page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub resolution: Resolution,
    pub framerate: u32,
    /// Rotation in degrees, a multiple of 90
    pub rotation: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            framerate: DEFAULT_FRAMERATE,
            rotation: DEFAULT_ROTATION,
        }
    }
}

/// Frame assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Accumulations larger than this are dropped as corrupt
    pub max_frame_bytes: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Capture source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Program that writes an MJPEG stream to stdout
    pub program: String,
    /// Extra arguments appended after the generated camera arguments
    pub extra_args: Vec<String>,
    /// Read MJPEG from our own stdin instead of spawning `program`
    pub stdin: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            program: "libcamera-vid".to_string(),
            extra_args: Vec::new(),
            stdin: false,
        }
    }
}

impl CaptureSettings {
    /// Arguments for `program` so that it emits MJPEG on stdout
    pub fn command_args(&self, camera: &CameraSettings) -> Vec<String> {
        let mut args = vec![
            "--codec".to_string(),
            "mjpeg".to_string(),
            "--width".to_string(),
            camera.resolution.width.to_string(),
            "--height".to_string(),
            camera.resolution.height.to_string(),
            "--framerate".to_string(),
            camera.framerate.to_string(),
            "--rotation".to_string(),
            camera.rotation.to_string(),
            "--timeout".to_string(),
            "0".to_string(),
            "--nopreview".to_string(),
            "--output".to_string(),
            "-".to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Raw, unvalidated overrides (typically from the command line)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub port: Option<String>,
    pub resolution: Option<String>,
    pub framerate: Option<String>,
    pub rotation: Option<String>,
    pub stdin: bool,
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub camera: CameraSettings,
    pub stream: StreamSettings,
    pub capture: CaptureSettings,
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "lan-mjpeg-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate();
        Ok(config)
    }

    /// Load from `path`, or from the platform default location when it
    /// exists. Any failure is logged and the built-in defaults are used.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        match candidate {
            Some(p) => match Self::load(&p) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", p.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("{}; using default configuration", e);
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }

    /// Apply command-line overrides, validating each value
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(raw) = &overrides.bind {
            self.server.bind_address = parse_bind_address(raw);
        }
        if let Some(raw) = &overrides.port {
            self.server.port = parse_port(raw);
        }
        if let Some(raw) = &overrides.resolution {
            self.camera.resolution = Resolution::parse_or_default(raw);
        }
        if let Some(raw) = &overrides.framerate {
            self.camera.framerate = parse_framerate(raw);
        }
        if let Some(raw) = &overrides.rotation {
            self.camera.rotation = parse_rotation(raw);
        }
        if overrides.stdin {
            self.capture.stdin = true;
        }
        self.validate();
    }

    /// Replace out-of-range values with defaults
    pub fn validate(&mut self) {
        let res = self.camera.resolution;
        if res.width == 0 || res.height == 0 {
            tracing::warn!("Resolution {} is not positive, defaulting to {}", res, Resolution::default());
            self.camera.resolution = Resolution::default();
        }

        if self.camera.framerate == 0 || self.camera.framerate > MAX_FRAMERATE {
            tracing::warn!(
                "Framerate {} out of range 1..={}, defaulting to {}",
                self.camera.framerate,
                MAX_FRAMERATE,
                DEFAULT_FRAMERATE
            );
            self.camera.framerate = DEFAULT_FRAMERATE;
        }

        if self.camera.rotation % 90 != 0 {
            tracing::warn!(
                "Rotation {} is not a multiple of 90, defaulting to {}",
                self.camera.rotation,
                DEFAULT_ROTATION
            );
            self.camera.rotation = DEFAULT_ROTATION;
        }
        self.camera.rotation %= 360;

        if self.stream.max_frame_bytes == 0 {
            self.stream.max_frame_bytes = DEFAULT_MAX_FRAME_BYTES;
        }
    }
}

/// Parse a listening port; non-numbers fall back to the default
///
/// `0` is accepted and binds an ephemeral port, as in the config file.
pub fn parse_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            tracing::warn!("Invalid port '{}', defaulting to {}", raw, DEFAULT_PORT);
            DEFAULT_PORT
        }
    }
}

pub fn parse_framerate(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(fps) if (1..=MAX_FRAMERATE).contains(&fps) => fps,
        _ => {
            tracing::warn!("Invalid framerate '{}', defaulting to {}", raw, DEFAULT_FRAMERATE);
            DEFAULT_FRAMERATE
        }
    }
}

/// Parse a rotation in degrees; negative angles are normalised
pub fn parse_rotation(raw: &str) -> u32 {
    match raw.trim().parse::<i64>() {
        Ok(deg) if deg % 90 == 0 => deg.rem_euclid(360) as u32,
        _ => {
            tracing::warn!(
                "Invalid rotation '{}' (must be a multiple of 90), defaulting to {}",
                raw,
                DEFAULT_ROTATION
            );
            DEFAULT_ROTATION
        }
    }
}

fn parse_bind_address(raw: &str) -> IpAddr {
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid bind address '{}', binding all interfaces", raw);
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolution_parse() {
        assert_eq!("1280x720".parse::<Resolution>().unwrap(), Resolution::new(1280, 720));
        assert_eq!(" 320X240 ".parse::<Resolution>().unwrap(), Resolution::new(320, 240));
        assert!("1280x".parse::<Resolution>().is_err());
        assert!("0x480".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_malformed_resolution_uses_default() {
        for raw in ["abc", "640", "-10x20", "", "x", "10x-20", "axb"] {
            assert_eq!(Resolution::parse_or_default(raw), Resolution::new(640, 480), "{raw}");
        }
    }

    #[test]
    fn test_resolution_display() {
        assert_eq!(Resolution::new(1920, 1080).to_string(), "1920x1080");
    }

    #[test]
    fn test_scalar_validators() {
        assert_eq!(parse_port("9000"), 9000);
        assert_eq!(parse_port(" 8001 "), 8001);
        assert_eq!(parse_port("http"), DEFAULT_PORT);
        assert_eq!(parse_port("70000"), DEFAULT_PORT);

        assert_eq!(parse_framerate("15"), 15);
        assert_eq!(parse_framerate("0"), DEFAULT_FRAMERATE);
        assert_eq!(parse_framerate("fast"), DEFAULT_FRAMERATE);

        assert_eq!(parse_rotation("180"), 180);
        assert_eq!(parse_rotation("-90"), 270);
        assert_eq!(parse_rotation("450"), 90);
        assert_eq!(parse_rotation("45"), DEFAULT_ROTATION);
    }

    #[test]
    fn test_ephemeral_port_agrees_with_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 0").unwrap();
        let from_file = AppConfig::load(file.path()).unwrap();

        let mut from_flags = AppConfig::default();
        from_flags.apply_overrides(&ConfigOverrides {
            port: Some("0".into()),
            ..Default::default()
        });

        assert_eq!(from_file.server.port, 0);
        assert_eq!(from_flags.server.port, 0);
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::default();
        config.apply_overrides(&ConfigOverrides {
            port: Some("8080".into()),
            resolution: Some("abc".into()),
            framerate: Some("25".into()),
            rotation: Some("90".into()),
            ..Default::default()
        });

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.camera.resolution, Resolution::default());
        assert_eq!(config.camera.framerate, 25);
        assert_eq!(config.camera.rotation, 90);
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9001
write_timeout_ms = 2000

[camera]
resolution = "1296x972"
framerate = 500
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.write_timeout(), Some(Duration::from_secs(2)));
        assert_eq!(config.camera.resolution, Resolution::new(1296, 972));
        // Out of range, replaced during validation
        assert_eq!(config.camera.framerate, DEFAULT_FRAMERATE);
        assert_eq!(config.capture.program, "libcamera-vid");
    }

    #[test]
    fn test_bad_toml_resolution_is_lenient() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\nresolution = \"wide\"").unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.camera.resolution, Resolution::default());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = AppConfig::load_or_default(Some(Path::new("/nonexistent/streamer.toml")));
        assert_eq!(config.server.port, DEFAULT_PORT);
    }

    #[test]
    fn test_command_args() {
        let camera = CameraSettings {
            resolution: Resolution::new(800, 600),
            framerate: 24,
            rotation: 180,
        };
        let args = CaptureSettings::default().command_args(&camera);
        let joined = args.join(" ");
        assert!(joined.contains("--codec mjpeg"));
        assert!(joined.contains("--width 800 --height 600"));
        assert!(joined.contains("--framerate 24"));
        assert!(joined.contains("--rotation 180"));
        assert!(joined.ends_with("--output -"));
    }
}
