//! MJPEG multipart codec
//!
//! Writes and parses the `multipart/x-mixed-replace` framing used on the
//! stream endpoint: one part per JPEG frame, delimited by `--FRAME`.

pub mod decoder;
pub mod encoder;

pub use decoder::PartDecoder;
pub use encoder::{encode_part, PartEncoder, MULTIPART_CONTENT_TYPE};
