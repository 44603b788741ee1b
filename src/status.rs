//! Read-only observability endpoint.
//!
//! Serves consistent snapshots of the registries, the routing state, and
//! the metrics counters. Strictly an observer: nothing here mutates
//! control-plane state.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::{CoreMetrics, MetricsSnapshot};
use crate::registry::{ProxyRecord, ProxyRegistry, ServerRecord, ServerRegistry};
use crate::routing::{PlayerRoutingService, RoutingSnapshot};

pub struct AppState {
    servers: Arc<ServerRegistry>,
    proxies: Arc<ProxyRegistry>,
    routing: Arc<PlayerRoutingService>,
    metrics: Arc<CoreMetrics>,
}

impl AppState {
    pub fn new(
        servers: Arc<ServerRegistry>,
        proxies: Arc<ProxyRegistry>,
        routing: Arc<PlayerRoutingService>,
        metrics: Arc<CoreMetrics>,
    ) -> Self {
        Self {
            servers,
            proxies,
            routing,
            metrics,
        }
    }
}

#[derive(Serialize)]
pub struct StatusSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub servers: Vec<ServerRecord>,
    pub proxies: Vec<ProxyRecord>,
    pub routing: Option<RoutingSnapshot>,
    pub metrics: MetricsSnapshot,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/status", get(status))
        .route("/v1/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(StatusSnapshot {
        timestamp: chrono::Utc::now(),
        servers: state.servers.snapshot(),
        proxies: state.proxies.snapshot(),
        routing: state.routing.snapshot().await,
        metrics: state.metrics.snapshot().await,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot().await)
}
