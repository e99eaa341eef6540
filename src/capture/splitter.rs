//! JPEG stream splitter
//!
//! Cuts an MJPEG byte stream, delivered in arbitrary read-sized pieces,
//! into whole `SOI .. EOI` images. Marker segments are walked by their
//! declared lengths and entropy-coded data is scanned with byte stuffing
//! taken into account, so an `FF D9` inside an APP segment or a stuffed
//! `FF 00` never ends an image early.

use bytes::{Buf, Bytes, BytesMut};

use crate::constants::{DEFAULT_MAX_FRAME_BYTES, JPEG_SOI};

#[derive(Debug, Clone, Copy)]
enum Scan {
    /// Looking for a start-of-image marker
    Seeking,
    /// Expecting a marker at this offset
    Segments(usize),
    /// Inside entropy-coded data, scanning from this offset
    Entropy(usize),
}

enum Step {
    /// Wait for more input, resuming at this state
    NeedMore(Scan),
    /// Continue scanning in a new state
    Next(Scan),
    /// A complete image ends at this offset (exclusive)
    Emit(usize),
    /// Drop this many leading bytes and seek the next image
    Skip(usize),
}

/// Incremental SOI..EOI splitter
pub struct JpegSplitter {
    buf: BytesMut,
    scan: Scan,
    max_image_bytes: usize,
    images: u64,
    skipped_bytes: u64,
    resyncs: u64,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::with_max_image_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_image_bytes(max_image_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(128 * 1024),
            scan: Scan::Seeking,
            max_image_bytes,
            images: 0,
            skipped_bytes: 0,
            resyncs: 0,
        }
    }

    /// Feed raw stream bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete image, if one has been fully received
    pub fn next_image(&mut self) -> Option<Bytes> {
        loop {
            match self.step() {
                Step::NeedMore(scan) => {
                    self.scan = scan;
                    if !matches!(scan, Scan::Seeking) && self.buf.len() > self.max_image_bytes {
                        tracing::warn!(
                            "JPEG image exceeds {} bytes without an end marker, resynchronising",
                            self.max_image_bytes
                        );
                        self.resyncs += 1;
                        self.skip(self.buf.len());
                    }
                    return None;
                }
                Step::Next(scan) => self.scan = scan,
                Step::Emit(end) => {
                    self.scan = Scan::Seeking;
                    self.images += 1;
                    return Some(self.buf.split_to(end).freeze());
                }
                Step::Skip(n) => {
                    if !matches!(self.scan, Scan::Seeking) {
                        tracing::debug!("Corrupt JPEG data, resynchronising");
                        self.resyncs += 1;
                    }
                    self.skip(n);
                }
            }
        }
    }

    fn skip(&mut self, n: usize) {
        self.skipped_bytes += n as u64;
        self.buf.advance(n);
        self.scan = Scan::Seeking;
    }

    fn step(&self) -> Step {
        let buf = &self.buf[..];
        match self.scan {
            Scan::Seeking => match buf.windows(2).position(|w| w == JPEG_SOI) {
                Some(0) => Step::Next(Scan::Segments(2)),
                Some(pos) => Step::Skip(pos),
                None => {
                    // A trailing 0xFF may be the first half of the next SOI
                    let keep = usize::from(buf.last() == Some(&0xFF));
                    if buf.len() > keep {
                        Step::Skip(buf.len() - keep)
                    } else {
                        Step::NeedMore(Scan::Seeking)
                    }
                }
            },
            Scan::Segments(i) => {
                if i + 2 > buf.len() {
                    return Step::NeedMore(Scan::Segments(i));
                }
                if buf[i] != 0xFF {
                    return Step::Skip(1);
                }
                match buf[i + 1] {
                    0xFF => Step::Next(Scan::Segments(i + 1)),
                    0xD9 => Step::Emit(i + 2),
                    0x01 | 0xD0..=0xD7 => Step::Next(Scan::Segments(i + 2)),
                    // New image before the previous one ended
                    0xD8 => Step::Skip(i),
                    marker => {
                        if i + 4 > buf.len() {
                            return Step::NeedMore(Scan::Segments(i));
                        }
                        let len = u16::from_be_bytes([buf[i + 2], buf[i + 3]]) as usize;
                        if len < 2 {
                            return Step::Skip(1);
                        }
                        let next = i + 2 + len;
                        if marker == 0xDA {
                            Step::Next(Scan::Entropy(next))
                        } else {
                            Step::Next(Scan::Segments(next))
                        }
                    }
                }
            }
            Scan::Entropy(mut i) => {
                while i + 2 <= buf.len() {
                    if buf[i] == 0xFF {
                        match buf[i + 1] {
                            // Stuffed byte or restart marker
                            0x00 | 0xD0..=0xD7 => i += 2,
                            // Fill byte
                            0xFF => i += 1,
                            _ => return Step::Next(Scan::Segments(i)),
                        }
                    } else {
                        i += 1;
                    }
                }
                Step::NeedMore(Scan::Entropy(i))
            }
        }
    }

    pub fn images(&self) -> u64 {
        self.images
    }

    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}

impl Default for JpegSplitter {
    fn default() -> Self {
        Self::new()
    }
}
