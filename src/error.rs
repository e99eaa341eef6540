//! Error types for the video streaming application

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture (producer) errors
///
/// Any of these reaching the binary is fatal: without a frame source
/// there is nothing to serve.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to spawn capture process '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Capture process has no stdout")]
    NoOutput,

    #[error("Failed to read from capture source: {0}")]
    Read(String),

    #[error("Capture stream ended")]
    StreamEnded,

    #[error("Capture thread failed: {0}")]
    Thread(String),
}

/// HTTP server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Server terminated: {0}")]
    Serve(String),
}

/// Stream client and multipart codec errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unexpected HTTP status: {0}")]
    BadStatus(u16),

    #[error("Not a multipart stream: {0}")]
    NotMultipart(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Part too large: {size} bytes (max {max})")]
    PartTooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
