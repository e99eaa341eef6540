//! Single-slot frame buffer
//!
//! One producer appends MJPEG chunks; any number of readers wait for the
//! next completed frame. Only the most recent frame is kept: a slow reader
//! skips straight to the newest frame when it comes back to wait.
//!
//! Frame boundaries are detected by a JPEG start-of-image marker (`FF D8`)
//! at the *start* of a chunk. A marker split across two chunks is not
//! recognised, so producers must hand over chunks that begin on image
//! boundaries (see [`crate::capture::JpegSplitter`]).

use bytes::BytesMut;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::constants::{DEFAULT_MAX_FRAME_BYTES, JPEG_SOI};
use crate::video::frame::Frame;

/// Producer-side state, only touched under the lock
struct Assembly {
    /// Bytes of the frame currently being assembled
    data: BytesMut,
    /// Whether a start marker has been seen since the last (re)sync
    synced: bool,
    /// Sequence number for the next publication
    next_sequence: u64,
    /// `None` once the buffer has been closed
    publisher: Option<watch::Sender<Option<Frame>>>,
}

/// Thread-safe latest-frame store with wake-all publication
pub struct FrameBuffer {
    assembly: Mutex<Assembly>,
    /// Kept for non-waiting reads and for subscribing after close
    latest_rx: watch::Receiver<Option<Frame>>,
    max_frame_bytes: usize,
    start_time: Instant,
    frames_published: AtomicU64,
    bytes_received: AtomicU64,
    bytes_discarded: AtomicU64,
    frames_oversize: AtomicU64,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default size limit
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a buffer that drops any frame growing beyond `max_frame_bytes`
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            assembly: Mutex::new(Assembly {
                data: BytesMut::with_capacity(64 * 1024),
                synced: false,
                next_sequence: 0,
                publisher: Some(tx),
            }),
            latest_rx: rx,
            max_frame_bytes,
            start_time: Instant::now(),
            frames_published: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_discarded: AtomicU64::new(0),
            frames_oversize: AtomicU64::new(0),
        }
    }

    /// Append a chunk from the producer
    ///
    /// A chunk starting with the JPEG start marker completes the frame
    /// assembled so far: that frame is published and every waiting
    /// subscriber is woken, then assembly restarts with this chunk. Bytes
    /// received before the first marker are discarded.
    ///
    /// Returns the number of bytes consumed, which is 0 once closed.
    pub fn append(&self, chunk: &[u8]) -> usize {
        let mut asm = self.assembly.lock();
        if asm.publisher.is_none() {
            return 0;
        }

        self.bytes_received
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        if chunk.starts_with(&JPEG_SOI) {
            if asm.synced && !asm.data.is_empty() {
                self.publish(&mut asm);
            }
            asm.synced = true;
            asm.data.clear();
            self.extend(&mut asm, chunk);
        } else if asm.synced {
            self.extend(&mut asm, chunk);
        } else {
            self.bytes_discarded
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }

        chunk.len()
    }

    fn extend(&self, asm: &mut Assembly, chunk: &[u8]) {
        if asm.data.len() + chunk.len() > self.max_frame_bytes {
            tracing::warn!(
                "Frame exceeds {} bytes, dropping it and waiting for the next start marker",
                self.max_frame_bytes
            );
            self.frames_oversize.fetch_add(1, Ordering::Relaxed);
            self.bytes_discarded
                .fetch_add((asm.data.len() + chunk.len()) as u64, Ordering::Relaxed);
            asm.data.clear();
            asm.synced = false;
            return;
        }
        asm.data.extend_from_slice(chunk);
    }

    fn publish(&self, asm: &mut Assembly) {
        let data = asm.data.split().freeze();
        let sequence = asm.next_sequence;
        asm.next_sequence += 1;

        let frame = Frame::new(
            data,
            sequence,
            self.start_time.elapsed().as_micros() as u64,
        );
        tracing::trace!(sequence, len = frame.len(), "Publishing frame");

        if let Some(tx) = &asm.publisher {
            tx.send_replace(Some(frame));
        }
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a reader that waits for frames published after this call
    pub fn subscribe(&self) -> FrameSubscriber {
        let asm = self.assembly.lock();
        let rx = match &asm.publisher {
            Some(tx) => tx.subscribe(),
            None => {
                let mut rx = self.latest_rx.clone();
                rx.borrow_and_update();
                rx
            }
        };
        FrameSubscriber { rx }
    }

    /// The most recently published frame, without waiting
    pub fn current(&self) -> Option<Frame> {
        self.latest_rx.borrow().clone()
    }

    /// Stop accepting input and release every waiting subscriber
    pub fn close(&self) {
        let mut asm = self.assembly.lock();
        if asm.publisher.take().is_some() {
            asm.data.clear();
            tracing::info!("Frame buffer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.assembly.lock().publisher.is_none()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.assembly
            .lock()
            .publisher
            .as_ref()
            .map(|tx| tx.receiver_count().saturating_sub(1))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            frames_oversize: self.frames_oversize.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to a frame buffer
pub type SharedFrameBuffer = Arc<FrameBuffer>;

/// Create a new shared frame buffer
pub fn create_shared_buffer(max_frame_bytes: usize) -> SharedFrameBuffer {
    Arc::new(FrameBuffer::with_max_frame_bytes(max_frame_bytes))
}

/// Per-reader handle remembering which frame it saw last
pub struct FrameSubscriber {
    rx: watch::Receiver<Option<Frame>>,
}

impl FrameSubscriber {
    /// Wait for a frame published since the last one this subscriber saw
    ///
    /// Returns `None` once the buffer is closed. Intermediate frames
    /// published while the caller was busy are skipped.
    pub async fn latest(&mut self) -> Option<Frame> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}

/// Frame buffer counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferStats {
    pub frames_published: u64,
    pub bytes_received: u64,
    /// Bytes dropped before sync or as part of an oversize frame
    pub bytes_discarded: u64,
    pub frames_oversize: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn jpeg(body: &[u8]) -> Vec<u8> {
        let mut v = JPEG_SOI.to_vec();
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn test_boundary_detection() {
        let buffer = FrameBuffer::new();

        buffer.append(&jpeg(b"one"));
        buffer.append(b"-tail");
        assert!(buffer.current().is_none());

        buffer.append(&jpeg(b"two"));
        let first = buffer.current().unwrap();
        assert_eq!(first.data().as_ref(), &jpeg(b"one-tail")[..]);
        assert_eq!(first.sequence(), 0);

        buffer.append(&jpeg(b"three"));
        let second = buffer.current().unwrap();
        assert_eq!(second.data().as_ref(), &jpeg(b"two")[..]);
        assert_eq!(second.sequence(), 1);
        assert_eq!(buffer.stats().frames_published, 2);
    }

    #[test]
    fn test_pre_marker_bytes_discarded() {
        let buffer = FrameBuffer::new();

        assert_eq!(buffer.append(b"garbage"), 7);
        buffer.append(&jpeg(b"a"));
        assert!(buffer.current().is_none());

        buffer.append(&jpeg(b"b"));
        assert_eq!(buffer.current().unwrap().data().as_ref(), &jpeg(b"a")[..]);
        assert_eq!(buffer.stats().bytes_discarded, 7);
    }

    #[test]
    fn test_oversize_frame_dropped() {
        let buffer = FrameBuffer::with_max_frame_bytes(8);

        buffer.append(&jpeg(b"1234"));
        buffer.append(b"56789");
        // Assembly restarts at the next marker
        buffer.append(&jpeg(b"ok"));
        assert!(buffer.current().is_none());

        buffer.append(&jpeg(b"next"));
        assert_eq!(buffer.current().unwrap().data().as_ref(), &jpeg(b"ok")[..]);
        assert_eq!(buffer.stats().frames_oversize, 1);
    }

    #[test]
    fn test_append_after_close() {
        let buffer = FrameBuffer::new();
        buffer.close();
        assert!(buffer.is_closed());
        assert_eq!(buffer.append(&jpeg(b"x")), 0);
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let buffer = Arc::new(FrameBuffer::new());
        let mut sub = buffer.subscribe();

        let waiter = tokio::spawn(async move { sub.latest().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());

        let mut late = buffer.subscribe();
        assert!(late.latest().await.is_none());
    }

    #[tokio::test]
    async fn test_subscriber_waits_for_new_frame() {
        let buffer = FrameBuffer::new();
        buffer.append(&jpeg(b"a"));
        buffer.append(&jpeg(b"b"));

        // Frame "a" was published before subscribing, so it is not returned
        let mut sub = buffer.subscribe();
        let pending = tokio::time::timeout(Duration::from_millis(30), sub.latest()).await;
        assert!(pending.is_err());

        buffer.append(&jpeg(b"c"));
        let frame = sub.latest().await.unwrap();
        assert_eq!(frame.data().as_ref(), &jpeg(b"b")[..]);
    }

    #[tokio::test]
    async fn test_slow_reader_gets_latest_only() {
        let buffer = FrameBuffer::new();
        let mut sub = buffer.subscribe();

        buffer.append(&jpeg(b"0"));
        for i in 1..=5u8 {
            buffer.append(&jpeg(&[b'0' + i]));
        }

        let frame = sub.latest().await.unwrap();
        assert_eq!(frame.sequence(), 4);
        assert_eq!(frame.data().as_ref(), &jpeg(b"4")[..]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fan_out_to_all_waiters() {
        let buffer = Arc::new(FrameBuffer::new());

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let mut sub = buffer.subscribe();
                tokio::spawn(async move { sub.latest().await })
            })
            .collect();
        assert_eq!(buffer.subscriber_count(), 8);

        buffer.append(&jpeg(b"shared"));
        buffer.append(&jpeg(b"next"));

        for waiter in waiters {
            let frame = waiter.await.unwrap().unwrap();
            assert_eq!(frame.sequence(), 0);
            assert_eq!(frame.data().as_ref(), &jpeg(b"shared")[..]);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_partial_frames_under_concurrency() {
        let buffer = Arc::new(FrameBuffer::new());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mut sub = buffer.subscribe();
                tokio::spawn(async move {
                    let mut seen = 0u32;
                    let mut last_seq = None;
                    while let Some(frame) = sub.latest().await {
                        let data = frame.data();
                        assert_eq!(&data[..2], &JPEG_SOI);
                        // Frame k carries 50 + k copies of byte k
                        let k = data[2];
                        assert_eq!(data.len(), 2 + 50 + k as usize);
                        assert!(data[2..].iter().all(|b| *b == k));
                        if let Some(prev) = last_seq {
                            assert!(frame.sequence() > prev);
                        }
                        last_seq = Some(frame.sequence());
                        seen += 1;
                    }
                    seen
                })
            })
            .collect();

        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for k in 0..200u8 {
                    let body = vec![k; 50 + k as usize];
                    // Marker chunk, then the body split in two
                    buffer.append(&jpeg(&body[..10]));
                    buffer.append(&body[10..30]);
                    buffer.append(&body[30..]);
                    if k % 20 == 0 {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                buffer.append(&JPEG_SOI);
                std::thread::sleep(Duration::from_millis(20));
                buffer.close();
            })
        };

        producer.join().unwrap();
        for reader in readers {
            let seen = reader.await.unwrap();
            assert!(seen > 0);
        }
    }

    proptest! {
        #[test]
        fn prop_one_frame_per_marker(
            prefix in proptest::collection::vec(0u8..0xFF, 0..16),
            bodies in proptest::collection::vec(
                proptest::collection::vec(0u8..0xFF, 1..64),
                1..12,
            ),
            split in 1usize..8,
        ) {
            let buffer = FrameBuffer::new();
            let mut published = Vec::new();
            let mut record = |buffer: &FrameBuffer| {
                if let Some(frame) = buffer.current() {
                    if published.last().map(|f: &Frame| f.sequence()) != Some(frame.sequence()) {
                        published.push(frame);
                    }
                }
            };

            if !prefix.is_empty() {
                buffer.append(&prefix);
                record(&buffer);
            }
            for body in &bodies {
                // Body bytes never contain 0xFF, so only the first chunk
                // of each image starts with a marker
                let (head, tail) = body.split_at(split.min(body.len()));
                buffer.append(&jpeg(head));
                record(&buffer);
                for piece in tail.chunks(split) {
                    buffer.append(piece);
                    record(&buffer);
                }
            }
            buffer.append(&JPEG_SOI);
            record(&buffer);

            prop_assert_eq!(published.len(), bodies.len());
            for (frame, body) in published.iter().zip(&bodies) {
                prop_assert_eq!(frame.data().as_ref(), &jpeg(body)[..]);
            }
        }
    }
}
