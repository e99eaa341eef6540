//! Published video frame

use bytes::Bytes;
use std::fmt;

/// One complete encoded image
///
/// Cloning is cheap: the payload is reference counted and never mutated
/// after publication.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    /// Publication sequence number, starting at 0
    sequence: u64,
    /// Microseconds since the buffer was created
    timestamp_us: u64,
}

impl Frame {
    pub fn new(data: Bytes, sequence: u64, timestamp_us: u64) -> Self {
        Self {
            data,
            sequence,
            timestamp_us,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}
