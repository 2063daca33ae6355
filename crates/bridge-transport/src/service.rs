//! L4 bridge service: the axum listener around [`BridgeHandler`].

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    middleware::map_response_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::handler::BridgeHandler;

/// The single fixed bridge path. POST only.
pub const BRIDGE_PATH: &str = "/_bridge/v1/call";

/// Metrics path on the same listener.
pub const METRICS_PATH: &str = "/_bridge/metrics";

/// Liveness path.
pub const HEALTH_PATH: &str = "/health";

/// Bridge HTTP service.
pub struct BridgeService {
    config: ServerConfig,
    handler: Arc<BridgeHandler>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl BridgeService {
    pub fn new(config: ServerConfig, handler: Arc<BridgeHandler>) -> Self {
        Self {
            config,
            handler,
            shutdown_tx: None,
        }
    }

    /// Router with the bridge, metrics and health routes.
    ///
    /// Bodies over `max_body_bytes` are refused before buffering and answered
    /// with HTTP 413 carrying a validation envelope.
    pub fn router(&self) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(self.config.max_body_bytes));

        Router::new()
            .route(BRIDGE_PATH, post(bridge_call))
            .route(METRICS_PATH, get(metrics))
            .route(HEALTH_PATH, get(health_check))
            .layer(middleware)
            .layer(map_response_with_state(
                Arc::clone(&self.handler),
                envelope_oversized,
            ))
            .with_state(Arc::clone(&self.handler))
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(self.config.bind).await
    }

    /// Serve on `listener` in the background until [`BridgeService::shutdown`].
    pub fn spawn(&mut self, listener: TcpListener) -> JoinHandle<std::io::Result<()>> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let addr: Option<SocketAddr> = listener.local_addr().ok();
        let router = self.router();
        info!(addr = ?addr, path = BRIDGE_PATH, "Bridge endpoint listening");

        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = &result {
                error!(error = %e, "Bridge endpoint failed");
            }
            info!("Bridge endpoint stopped");
            result
        })
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn bridge_call(
    State(handler): State<Arc<BridgeHandler>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let (status, envelope) = handler.handle(&headers, &body).await;
    (status, Json(envelope))
}

/// The body limit answers 413 in plain text; callers expect an envelope.
async fn envelope_oversized(
    State(handler): State<Arc<BridgeHandler>>,
    response: Response,
) -> Response {
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return response;
    }
    (StatusCode::PAYLOAD_TOO_LARGE, Json(handler.reject_oversized())).into_response()
}

async fn metrics(State(handler): State<Arc<BridgeHandler>>) -> impl IntoResponse {
    Json(handler.metrics().to_json())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
