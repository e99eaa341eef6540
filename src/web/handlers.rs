//! HTTP handlers

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::codec::MULTIPART_CONTENT_TYPE;
use crate::constants::INDEX_PATH;
use crate::video::BufferStats;
use crate::web::server::AppState;
use crate::web::session::{ClientSession, SessionInfo};

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

/// Server status
#[derive(serde::Serialize)]
pub struct StatusReport {
    pub resolution: String,
    pub framerate: u32,
    pub rotation: u32,
    pub uptime_seconds: u64,
    pub source_closed: bool,
    pub latest_frame_bytes: Option<usize>,
    pub buffer: BufferStats,
    pub clients: Vec<SessionInfo>,
}

/// `GET /`
pub async fn redirect_to_index() -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, INDEX_PATH)]).into_response()
}

/// `GET /index.html`
pub async fn index_page(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/html")],
        state.index_page.clone(),
    )
        .into_response()
}

/// `GET /stream.mjpg`
///
/// Starts a [`ClientSession`] task and streams whatever it produces. The
/// body ends when the session closes; when the client disconnects the
/// body is dropped, which the session sees as a failed write.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let (tx, rx) = mpsc::channel::<Bytes>(1);

    let session = ClientSession::new(&state, peer);
    tokio::spawn(async move {
        session.run(&state, tx).await;
    });

    let parts = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|part| (Ok::<_, Infallible>(part), rx))
    });

    (
        [
            (header::AGE, "0"),
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::PRAGMA, "no-cache"),
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

/// `GET /status`
pub async fn status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusReport>> {
    let camera = &state.config.camera;
    let report = StatusReport {
        resolution: camera.resolution.to_string(),
        framerate: camera.framerate,
        rotation: camera.rotation,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        source_closed: state.buffer.is_closed(),
        latest_frame_bytes: state.buffer.current().map(|f| f.len()),
        buffer: state.buffer.stats(),
        clients: state.sessions.snapshot(),
    };

    Json(ApiResponse::ok(report))
}

/// Anything else
pub async fn not_found(
    uri: Uri,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> (StatusCode, &'static str) {
    match connect_info {
        Some(ConnectInfo(addr)) => {
            tracing::warn!("Unrecognized request from client @ {}: {}", addr, uri)
        }
        None => tracing::warn!("Unrecognized request: {}", uri),
    }
    (StatusCode::NOT_FOUND, "404 Not Found\n")
}
