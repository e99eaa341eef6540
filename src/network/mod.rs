//! Network client for MJPEG streams

pub mod client;

pub use client::{ClientStats, StreamClient};
