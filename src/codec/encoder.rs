//! Multipart part encoder
//!
//! Produces one part per frame:
//!
//! ```text
//! --FRAME\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::BOUNDARY;
use crate::video::Frame;

/// `Content-Type` header value of the stream response
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=FRAME";

/// Part header overhead is well under this for any realistic length
const HEADER_RESERVE: usize = 96;

/// Append one multipart part carrying `payload` to `dst`
pub fn encode_part(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_RESERVE + payload.len());
    dst.put_slice(b"--");
    dst.put_slice(BOUNDARY.as_bytes());
    dst.put_slice(b"\r\n");
    dst.put_slice(b"Content-Type: image/jpeg\r\n");
    dst.put_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
    dst.put_slice(payload);
    dst.put_slice(b"\r\n");
}

/// Per-connection encoder with a reusable output buffer
pub struct PartEncoder {
    buffer: BytesMut,
    /// Parts produced so far
    parts_encoded: u64,
    /// Total bytes produced, headers included
    bytes_produced: u64,
}

impl PartEncoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            parts_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode a frame into a ready-to-send chunk
    pub fn encode(&mut self, frame: &Frame) -> Bytes {
        encode_part(frame.data(), &mut self.buffer);
        let part = self.buffer.split().freeze();

        self.parts_encoded += 1;
        self.bytes_produced += part.len() as u64;
        part
    }

    pub fn parts_encoded(&self) -> u64 {
        self.parts_encoded
    }

    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }
}

impl Default for PartEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_layout() {
        let mut buf = BytesMut::new();
        encode_part(b"\xFF\xD8jpeg", &mut buf);

        assert_eq!(
            &buf[..],
            &b"--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: 6\r\n\r\n\xFF\xD8jpeg\r\n"[..]
        );
    }

    #[test]
    fn test_content_type_matches_boundary() {
        assert!(MULTIPART_CONTENT_TYPE.ends_with(&format!("boundary={}", BOUNDARY)));
    }

    #[test]
    fn test_encoder_stats() {
        let mut encoder = PartEncoder::new();
        let frame = Frame::new(Bytes::from_static(b"\xFF\xD8abc"), 0, 0);

        let first = encoder.encode(&frame);
        let second = encoder.encode(&frame);

        assert_eq!(first, second);
        assert_eq!(encoder.parts_encoded(), 2);
        assert_eq!(encoder.bytes_produced(), (first.len() * 2) as u64);
    }
}
