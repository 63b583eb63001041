//! HTTP server for health and metrics endpoints

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::metrics;

/// Health of one relay task
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RelayHealth {
    pub running: bool,
    pub last_error: Option<String>,
}

/// Oracle state shared between the relay tasks and the HTTP server
#[derive(Debug, Clone, Default)]
pub struct OracleStatus {
    pub oracle: String,
    pub dry_run: bool,
    pub relays: BTreeMap<String, RelayHealth>,
}

impl OracleStatus {
    pub fn relay_started(&mut self, name: &str) {
        self.relays.insert(
            name.to_string(),
            RelayHealth {
                running: true,
                last_error: None,
            },
        );
    }

    pub fn relay_stopped(&mut self, name: &str, error: Option<String>) {
        let entry = self.relays.entry(name.to_string()).or_default();
        entry.running = false;
        entry.last_error = error;
    }

    pub fn healthy(&self) -> bool {
        !self.relays.is_empty() && self.relays.values().all(|r| r.running)
    }
}

pub type SharedStatus = Arc<RwLock<OracleStatus>>;

#[derive(Clone)]
pub struct AppState {
    pub status: SharedStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub oracle: String,
    pub dry_run: bool,
    pub relays: BTreeMap<String, RelayHealth>,
}

/// Health check endpoint handler
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let status = state.status.read().await;
    let (code, label) = if status.healthy() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(HealthResponse {
            status: label.to_string(),
            oracle: status.oracle.clone(),
            dry_run: status.dry_run,
            relays: status.relays.clone(),
        }),
    )
}

/// Liveness probe (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    match metrics::gather_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response(),
    }
}

pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(AppState { status })
}

/// Start the HTTP server for health and metrics
pub async fn start_server(bind_address: &str, port: u16, status: SharedStatus) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("Health server listening on {}", addr);
    info!("  /health  - Relay status (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(status)).await?;

    Ok(())
}
