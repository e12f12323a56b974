//! `PulseServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REFUSED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::ws::heartbeat::{Heartbeat, HeartbeatError};
use crate::ws::registry::Registry;
use crate::ws::session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session registry and routing table.
    pub registry: Arc<Registry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Handle for rendering `/metrics`.
    pub metrics: PrometheusHandle,
    /// Gateway configuration.
    pub config: GatewayConfig,
    /// Heartbeat timing policy shared by every session.
    pub heartbeat: Heartbeat,
}

/// The pulse gateway server.
pub struct PulseServer {
    config: GatewayConfig,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
    heartbeat: Heartbeat,
}

impl PulseServer {
    /// Create a new server. Fails if the configured pong wait cannot
    /// produce a valid ping cadence.
    pub fn new(
        config: GatewayConfig,
        registry: Arc<Registry>,
        metrics: PrometheusHandle,
    ) -> Result<Self, HeartbeatError> {
        let heartbeat = config.heartbeat()?;
        Ok(Self {
            config,
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
            heartbeat,
        })
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            heartbeat: self.heartbeat,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve. Returns the bound address (useful with port 0)
    /// and the serve task handle. The task stops accepting when the
    /// shutdown coordinator fires and finishes once open connections
    /// have drained.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "gateway listening");

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(error) = serve.await {
                error!(%error, "server task failed");
            }
        });

        Ok((addr, handle))
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The heartbeat policy derived from the configuration.
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.registry.count().await;
    Json(health::health_check(state.start_time, sessions))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

/// GET /ws — the WebSocket upgrade.
///
/// Refuses the upgrade while shutting down or at the connection cap;
/// otherwise hands the socket to [`session::run`] with the configured
/// frame-size limit applied.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if state.registry.count().await >= state.config.max_connections {
        warn!(
            max_connections = state.config.max_connections,
            "upgrade refused, connection cap reached"
        );
        counter!(WS_CONNECTIONS_REFUSED_TOTAL).increment(1);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let registry = state.registry.clone();
    let heartbeat = state.heartbeat;
    let egress_capacity = state.config.egress_capacity;
    ws.max_frame_size(state.config.max_frame_size)
        .max_message_size(state.config.max_frame_size)
        .on_upgrade(move |socket| session::run(socket, registry, heartbeat, egress_capacity))
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server() -> PulseServer {
        let metrics = PrometheusBuilder::new().build_recorder().handle();
        PulseServer::new(GatewayConfig::default(), Arc::new(Registry::new()), metrics).unwrap()
    }

    #[tokio::test]
    async fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
    }

    #[test]
    fn rejects_degenerate_heartbeat_config() {
        let metrics = PrometheusBuilder::new().build_recorder().handle();
        let config = GatewayConfig {
            pong_wait_ms: 1,
            ..GatewayConfig::default()
        };
        assert!(PulseServer::new(config, Arc::new(Registry::new()), metrics).is_err());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["sessions"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade_headers() {
        let server = make_server();
        let app = server.router();

        // A plain GET is not a WebSocket handshake.
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_an_ephemeral_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().shutdown();
        assert!(server.shutdown().is_shutting_down());
    }
}
