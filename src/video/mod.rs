//! Video frame subsystem
//!
//! Frames flow from a single producer into the [`FrameBuffer`], which
//! publishes each completed JPEG to any number of [`FrameSubscriber`]s.

pub mod buffer;
pub mod frame;

pub use buffer::{BufferStats, FrameBuffer, FrameSubscriber, SharedFrameBuffer};
pub use frame::Frame;
