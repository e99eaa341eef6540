//! Broadcast web server

use axum::routing::get;
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::constants::{INDEX_PATH, STATUS_PATH, STREAM_PATH};
use crate::error::ServerError;
use crate::video::SharedFrameBuffer;
use crate::web::handlers;
use crate::web::page::render_index;
use crate::web::session::SessionRegistry;

/// Shared state passed to all request handlers
pub struct AppState {
    /// Validated configuration, immutable once serving
    pub config: AppConfig,
    /// Frame source for every streaming session
    pub buffer: SharedFrameBuffer,
    /// Active streaming sessions
    pub sessions: SessionRegistry,
    /// Cancelled on server-wide shutdown
    pub shutdown: CancellationToken,
    /// Landing page, rendered once
    pub index_page: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, buffer: SharedFrameBuffer, shutdown: CancellationToken) -> Self {
        let index_page = render_index(config.camera.resolution);
        Self {
            config,
            buffer,
            sessions: SessionRegistry::new(),
            shutdown,
            index_page,
            start_time: Instant::now(),
        }
    }
}

/// HTTP server broadcasting one frame buffer to many clients
pub struct StreamServer {
    state: Arc<AppState>,
}

impl StreamServer {
    pub fn new(config: AppConfig, buffer: SharedFrameBuffer) -> Self {
        Self::with_shutdown(config, buffer, CancellationToken::new())
    }

    /// Create a server that stops when `shutdown` is cancelled
    pub fn with_shutdown(
        config: AppConfig,
        buffer: SharedFrameBuffer,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state: Arc::new(AppState::new(config, buffer, shutdown)),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(handlers::redirect_to_index))
            .route(INDEX_PATH, get(handlers::index_page))
            .route(STREAM_PATH, get(handlers::stream))
            .route(STATUS_PATH, get(handlers::status))
            .fallback(handlers::not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address with `SO_REUSEADDR`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        bind_reusable(self.state.config.server.socket_addr())
    }

    /// Serve on `listener` until the shutdown token is cancelled
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let app = self.router();
        let shutdown = self.state.shutdown.clone();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Serving video stream on http://{}", addr);
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Closing video stream");
        Ok(())
    }

    /// Bind and serve in a background task, returning the bound address
    pub fn start_background(
        self,
    ) -> Result<(SocketAddr, JoinHandle<Result<(), ServerError>>), ServerError> {
        let listener = self.bind()?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindFailed(e.to_string()))?;
        Ok((addr, tokio::spawn(self.serve(listener))))
    }
}

fn bind_reusable(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let bind_err = |e: std::io::Error| ServerError::BindFailed(format!("{}: {}", addr, e));

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(1024).map_err(bind_err)?;

    TcpListener::from_std(socket.into()).map_err(bind_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::FrameBuffer;
    use std::time::Duration;

    fn local_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.server.bind_address = "127.0.0.1".parse().unwrap();
        config.server.port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let server = StreamServer::new(local_config(), Arc::new(FrameBuffer::new()));
        let token = server.shutdown_token();

        let (addr, handle) = server.start_background().unwrap();
        assert_ne!(addr.port(), 0);
        let connection = tokio::net::TcpStream::connect(addr).await.unwrap();
        drop(connection);

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_reported() {
        let first = StreamServer::new(local_config(), Arc::new(FrameBuffer::new()));
        let listener = first.bind().unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = local_config();
        config.server.port = port;
        let second = StreamServer::new(config, Arc::new(FrameBuffer::new()));
        assert!(matches!(second.bind(), Err(ServerError::BindFailed(_))));
    }
}
