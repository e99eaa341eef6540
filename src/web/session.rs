//! Streaming client sessions
//!
//! Each request to the stream endpoint gets one [`ClientSession`], running
//! as its own task:
//!
//! ```text
//! AwaitingFrame ──frame──► Writing ──ok──► AwaitingFrame ─ ... ─► Closed
//! ```
//!
//! The session hands encoded parts to the response body through a
//! one-slot channel. A failed or timed-out send is the normal way a session
//! learns that its client went away.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::PartEncoder;
use crate::video::{Frame, FrameSubscriber};
use crate::web::server::AppState;

/// Streaming connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFrame,
    Writing(Frame),
    Closed(CloseReason),
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection's write side went away
    ClientGone,
    /// The client did not accept a frame within the write timeout
    WriteTimeout,
    /// The frame buffer was closed
    BufferClosed,
    /// Server-wide shutdown
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ClientGone => "client disconnected",
            Self::WriteTimeout => "write timed out",
            Self::BufferClosed => "frame source closed",
            Self::Shutdown => "server shutting down",
        };
        f.write_str(text)
    }
}

/// Public view of an active session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    pub frames_sent: u64,
}

/// Active streaming sessions, keyed by session id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: Uuid, peer: Option<SocketAddr>) {
        self.sessions.insert(
            id,
            SessionInfo {
                id,
                peer,
                connected_at: Utc::now(),
                frames_sent: 0,
            },
        );
    }

    fn record_frame(&self, id: &Uuid) {
        if let Some(mut info) = self.sessions.get_mut(id) {
            info.frames_sent += 1;
        }
    }

    fn remove(&self, id: &Uuid) -> Option<SessionInfo> {
        self.sessions.remove(id).map(|(_, info)| info)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all sessions, oldest first
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut all: Vec<SessionInfo> = self.sessions.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.connected_at);
        all
    }
}

/// One streaming client
pub struct ClientSession {
    id: Uuid,
    peer: Option<SocketAddr>,
    subscriber: FrameSubscriber,
    encoder: PartEncoder,
    shutdown: CancellationToken,
    write_timeout: Option<Duration>,
    state: SessionState,
}

impl ClientSession {
    /// Create a session and register it with the server state
    ///
    /// The session subscribes immediately, so the first frame it sends is
    /// the first one published after the request arrived.
    pub fn new(app: &AppState, peer: Option<SocketAddr>) -> Self {
        let id = Uuid::new_v4();
        app.sessions.register(id, peer);
        Self {
            id,
            peer,
            subscriber: app.buffer.subscribe(),
            encoder: PartEncoder::new(),
            shutdown: app.shutdown.clone(),
            write_timeout: app.config.server.write_timeout(),
            state: SessionState::AwaitingFrame,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the session until it closes, sending parts into `tx`
    pub async fn run(mut self, app: &AppState, tx: mpsc::Sender<Bytes>) -> CloseReason {
        tracing::info!(session = %self.id, peer = ?self.peer, "Streaming client connected");

        let reason = loop {
            let current = std::mem::replace(&mut self.state, SessionState::AwaitingFrame);
            self.state = match current {
                SessionState::AwaitingFrame => self.await_frame(&tx).await,
                SessionState::Writing(frame) => {
                    let next = self.write_frame(&tx, frame).await;
                    if next == SessionState::AwaitingFrame {
                        app.sessions.record_frame(&self.id);
                    }
                    next
                }
                SessionState::Closed(reason) => {
                    self.state = SessionState::Closed(reason);
                    break reason;
                }
            };
        };

        let frames_sent = app
            .sessions
            .remove(&self.id)
            .map(|info| info.frames_sent)
            .unwrap_or_else(|| self.encoder.parts_encoded());
        tracing::info!(
            session = %self.id,
            peer = ?self.peer,
            frames_sent,
            "Removed streaming client: {}",
            reason
        );
        reason
    }

    async fn await_frame(&mut self, tx: &mpsc::Sender<Bytes>) -> SessionState {
        tokio::select! {
            _ = self.shutdown.cancelled() => SessionState::Closed(CloseReason::Shutdown),
            _ = tx.closed() => SessionState::Closed(CloseReason::ClientGone),
            frame = self.subscriber.latest() => match frame {
                Some(frame) => SessionState::Writing(frame),
                None => SessionState::Closed(CloseReason::BufferClosed),
            },
        }
    }

    async fn write_frame(&mut self, tx: &mpsc::Sender<Bytes>, frame: Frame) -> SessionState {
        let part = self.encoder.encode(&frame);
        tracing::trace!(session = %self.id, sequence = frame.sequence(), len = part.len(), "Writing frame");

        let send = async {
            match self.write_timeout {
                Some(limit) => match tokio::time::timeout(limit, tx.send(part)).await {
                    Ok(Ok(())) => SessionState::AwaitingFrame,
                    Ok(Err(_)) => SessionState::Closed(CloseReason::ClientGone),
                    Err(_) => SessionState::Closed(CloseReason::WriteTimeout),
                },
                None => match tx.send(part).await {
                    Ok(()) => SessionState::AwaitingFrame,
                    Err(_) => SessionState::Closed(CloseReason::ClientGone),
                },
            }
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => SessionState::Closed(CloseReason::Shutdown),
            next = send => next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_part;
    use crate::config::AppConfig;
    use crate::constants::JPEG_SOI;
    use crate::video::FrameBuffer;
    use bytes::BytesMut;
    use std::sync::Arc;

    fn jpeg(tag: u8) -> Vec<u8> {
        let mut v = JPEG_SOI.to_vec();
        v.extend_from_slice(&[tag; 16]);
        v
    }

    fn app(config: AppConfig) -> Arc<AppState> {
        Arc::new(AppState::new(
            config,
            Arc::new(FrameBuffer::new()),
            CancellationToken::new(),
        ))
    }

    fn spawn_session(
        app: &Arc<AppState>,
        capacity: usize,
    ) -> (tokio::task::JoinHandle<CloseReason>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = ClientSession::new(app, None);
        let app = app.clone();
        let handle = tokio::spawn(async move { session.run(&app, tx).await });
        (handle, rx)
    }

    #[tokio::test]
    async fn test_frames_are_written_in_order() {
        let app = app(AppConfig::default());
        let (handle, mut rx) = spawn_session(&app, 1);
        assert_eq!(app.sessions.len(), 1);

        app.buffer.append(&jpeg(1));
        app.buffer.append(&jpeg(2));
        let first = rx.recv().await.unwrap();
        app.buffer.append(&jpeg(3));
        let second = rx.recv().await.unwrap();

        let mut expected = BytesMut::new();
        encode_part(&jpeg(1), &mut expected);
        assert_eq!(first, expected.split().freeze());
        encode_part(&jpeg(2), &mut expected);
        assert_eq!(second, expected.freeze());

        drop(rx);
        let reason = handle.await.unwrap();
        assert_eq!(reason, CloseReason::ClientGone);
        assert!(app.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let app = app(AppConfig::default());
        let (handle, _rx) = spawn_session(&app, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        app.shutdown.cancel();

        let reason = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn test_buffer_close_ends_session() {
        let app = app(AppConfig::default());
        let (handle, _rx) = spawn_session(&app, 1);

        app.buffer.close();
        assert_eq!(handle.await.unwrap(), CloseReason::BufferClosed);
    }

    #[tokio::test]
    async fn test_stalled_client_times_out() {
        let mut config = AppConfig::default();
        config.server.write_timeout_ms = Some(50);
        let app = app(config);
        // Receiver is kept but never read: the first part fills the slot
        let (handle, _rx) = spawn_session(&app, 1);

        let producer = {
            let app = app.clone();
            tokio::spawn(async move {
                for tag in 0..20u8 {
                    app.buffer.append(&jpeg(tag));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
        };

        let reason = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::WriteTimeout);
        producer.abort();
    }

    #[tokio::test]
    async fn test_registry_counts_frames() {
        let app = app(AppConfig::default());
        let (_handle, mut rx) = spawn_session(&app, 1);

        app.buffer.append(&jpeg(1));
        app.buffer.append(&jpeg(2));
        rx.recv().await.unwrap();
        // Counted once the next wait begins
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sessions = app.sessions.snapshot();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].frames_sent, 1);
    }
}
