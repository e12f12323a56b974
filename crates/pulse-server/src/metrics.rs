//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics`
/// endpoint. Must be called once at startup before any metrics are
/// recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Sessions opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Sessions closed total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused at the connection cap (counter).
pub const WS_CONNECTIONS_REFUSED_TOTAL: &str = "ws_connections_refused_total";
/// Outbound events dropped on full egress queues (counter).
pub const WS_EGRESS_DROPS_TOTAL: &str = "ws_egress_drops_total";
/// Server-initiated pings sent (counter).
pub const WS_PINGS_TOTAL: &str = "ws_pings_total";
/// Inbound events with no registered handler (counter).
pub const WS_ROUTING_ERRORS_TOTAL: &str = "ws_routing_errors_total";
/// Session lifetime in seconds (histogram).
pub const WS_SESSION_DURATION_SECONDS: &str = "ws_session_duration_seconds";
