//! Read-only status, health, and metrics HTTP surface (spec §6 "External
//! interface"). Intentionally thin: this node has no transaction-broadcast
//! or query API of its own, unlike the teacher's explorer surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::context::Context;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct StatusResponse {
    local_public_key: String,
    side_chains: Vec<SideChainStatus>,
}

#[derive(Serialize)]
struct SideChainStatus {
    genesis_address: String,
    last_processed_height: Option<u32>,
}

async fn health() -> (StatusCode, Json<HealthResponse>) {
    crate::metrics::HTTP_REQUESTS.with_label_values(&["/health", "200"]).inc();
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

async fn status(State(ctx): State<Arc<Context>>) -> Json<StatusResponse> {
    crate::metrics::HTTP_REQUESTS.with_label_values(&["/status", "200"]).inc();
    crate::metrics::update_uptime();

    let mut side_chains = Vec::new();
    for node in &ctx.config.side_node_list {
        let height = crate::store::tx_cache::TxCache::new(Arc::clone(&ctx.db))
            .get_current_height(&node.genesis_block_address)
            .unwrap_or(None);
        side_chains.push(SideChainStatus {
            genesis_address: node.genesis_block_address.clone(),
            last_processed_height: height,
        });
    }

    Json(StatusResponse {
        local_public_key: ctx.local_public_key.clone(),
        side_chains,
    })
}

async fn metrics() -> String {
    crate::metrics::HTTP_REQUESTS.with_label_values(&["/metrics", "200"]).inc();
    crate::metrics::gather_metrics()
}

/// Builds the router. Bound and served by the caller (`main`), matching
/// the teacher's axum setup in spirit but scoped to three read-only
/// routes instead of a full explorer API.
pub fn router(ctx: Arc<Context>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
