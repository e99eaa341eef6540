//! # LAN MJPEG Streamer
//!
//! Live camera broadcast over HTTP: one producer, any number of viewers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              CAMERA HOST                                     │
//! │  ┌──────────────────────┐                                                   │
//! │  │ Capture source       │  libcamera-vid / stdin (MJPEG byte stream)        │
//! │  └──────────┬───────────┘                                                   │
//! │             ▼                                                               │
//! │  ┌──────────────────────┐                                                   │
//! │  │ JpegSplitter         │  capture thread: whole SOI..EOI images            │
//! │  └──────────┬───────────┘                                                   │
//! │             ▼  append()                                                     │
//! │  ┌─────────────────────────────────────────────────────────────────────┐   │
//! │  │                  FrameBuffer (video::buffer)                         │   │
//! │  │   accumulation ──(FF D8)──► publish latest Frame ──► wake all        │   │
//! │  └─────────────────────────────────────────────────────────────────────┘   │
//! │             │ latest()          │ latest()          │ latest()             │
//! │             ▼                   ▼                   ▼                      │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐            │
//! │  │ ClientSession   │  │ ClientSession   │  │ ClientSession   │  (web)     │
//! │  │ AwaitingFrame ⇄ │  │ AwaitingFrame ⇄ │  │ AwaitingFrame ⇄ │            │
//! │  │ Writing         │  │ Writing         │  │ Writing         │            │
//! │  └────────┬────────┘  └────────┬────────┘  └────────┬────────┘            │
//! └───────────┼────────────────────┼────────────────────┼──────────────────────┘
//!             │  multipart/x-mixed-replace; boundary=FRAME
//!             ▼                    ▼                    ▼
//!        Browser              viewer (bin)          Browser
//! ```

pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod video;
pub mod web;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default HTTP listening port
    pub const DEFAULT_PORT: u16 = 8000;

    /// Default capture width in pixels
    pub const DEFAULT_WIDTH: u32 = 640;

    /// Default capture height in pixels
    pub const DEFAULT_HEIGHT: u32 = 480;

    /// Default capture framerate
    pub const DEFAULT_FRAMERATE: u32 = 30;

    /// Default rotation in degrees
    pub const DEFAULT_ROTATION: u32 = 0;

    /// Upper bound accepted for the framerate setting
    pub const MAX_FRAMERATE: u32 = 120;

    /// JPEG start-of-image marker
    pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

    /// JPEG end-of-image marker
    pub const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

    /// Largest frame the buffer will assemble before resynchronising
    pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

    /// Multipart boundary token used on the stream endpoint
    pub const BOUNDARY: &str = "FRAME";

    /// Landing page path
    pub const INDEX_PATH: &str = "/index.html";

    /// Streaming endpoint path
    pub const STREAM_PATH: &str = "/stream.mjpg";

    /// Status endpoint path
    pub const STATUS_PATH: &str = "/status";

    /// Read size used by the capture thread
    pub const CAPTURE_READ_SIZE: usize = 64 * 1024;
}
