//! Multipart part decoder
//!
//! Incremental parser for the stream endpoint's framing, used by the
//! stream client. Every part must carry a `Content-Length` header.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::constants::{BOUNDARY, DEFAULT_MAX_FRAME_BYTES};
use crate::error::ClientError;

/// Part headers larger than this are treated as a protocol error
const MAX_HEADER_BYTES: usize = 8 * 1024;

enum State {
    Header,
    Body(usize),
}

/// Decodes `multipart/x-mixed-replace` parts into JPEG payloads
pub struct PartDecoder {
    state: State,
    delimiter: String,
    max_part_bytes: usize,
    parts_decoded: u64,
    bytes_decoded: u64,
}

impl PartDecoder {
    pub fn new() -> Self {
        Self::with_boundary(BOUNDARY, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_boundary(boundary: &str, max_part_bytes: usize) -> Self {
        Self {
            state: State::Header,
            delimiter: format!("--{}", boundary),
            max_part_bytes,
            parts_decoded: 0,
            bytes_decoded: 0,
        }
    }

    pub fn parts_decoded(&self) -> u64 {
        self.parts_decoded
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    /// Parse a complete header block, returning the part length
    fn parse_header(&self, block: &[u8]) -> Result<usize, ClientError> {
        let text = std::str::from_utf8(block)
            .map_err(|_| ClientError::Malformed("part header is not UTF-8".into()))?;
        let mut lines = text.split("\r\n").filter(|l| !l.trim().is_empty());

        match lines.next() {
            Some(first) if first.trim() == self.delimiter => {}
            Some(first) => {
                return Err(ClientError::Malformed(format!(
                    "expected boundary '{}', got '{}'",
                    self.delimiter, first
                )))
            }
            None => return Err(ClientError::Malformed("empty part header".into())),
        }

        let mut length = None;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(ClientError::Malformed(format!("bad header line '{}'", line)));
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let n = value.trim().parse::<usize>().map_err(|_| {
                    ClientError::Malformed(format!("bad Content-Length '{}'", value.trim()))
                })?;
                length = Some(n);
            }
        }

        let length =
            length.ok_or_else(|| ClientError::Malformed("part without Content-Length".into()))?;
        if length > self.max_part_bytes {
            return Err(ClientError::PartTooLarge {
                size: length,
                max: self.max_part_bytes,
            });
        }
        Ok(length)
    }
}

impl Default for PartDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl Decoder for PartDecoder {
    type Item = Bytes;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ClientError> {
        loop {
            match self.state {
                State::Header => {
                    // Trailing CRLF of the previous part
                    while src.starts_with(b"\r\n") {
                        src.advance(2);
                    }

                    let Some(end) = find(src, b"\r\n\r\n") else {
                        if src.len() > MAX_HEADER_BYTES {
                            return Err(ClientError::Malformed("part header too long".into()));
                        }
                        return Ok(None);
                    };

                    let length = self.parse_header(&src[..end])?;
                    src.advance(end + 4);
                    self.state = State::Body(length);
                }
                State::Body(length) => {
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }

                    let payload = src.split_to(length).freeze();
                    self.state = State::Header;
                    self.parts_decoded += 1;
                    self.bytes_decoded += length as u64;
                    return Ok(Some(payload));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ClientError> {
        match self.decode(src)? {
            Some(part) => Ok(Some(part)),
            None => {
                if !src.iter().all(u8::is_ascii_whitespace) {
                    tracing::debug!("Stream ended inside a part, dropping {} bytes", src.len());
                }
                src.clear();
                Ok(None)
            }
        }
    }
}
