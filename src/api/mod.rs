//! HTTP/JSON API Layer
//!
//! REST-like endpoints following gRPC path conventions; the game backend
//! calls these via JSON-over-HTTP.
//!
//! ## Architecture
//! ```text
//! Game backend / bot platform
//!       ↓ HTTP POST, JSON body
//! Axum Router (port 50051)
//!       ↓
//! Service Handlers (referrals, milestones)
//!       ↓
//! ReferralLedger → StorageManager (PostgreSQL or in-memory)
//! ```
//!
//! ## Endpoint Convention
//! All endpoints follow the gRPC path pattern: `POST /referral.<Service>/<Method>`
//! Example: `POST /referral.LedgerService/RegisterReferral`
//!
//! Business-rule rejections come back as 200 with `success = false` and a
//! `failure_reason`; they are expected outcomes, not server errors.

pub mod milestones;
pub mod referrals;

use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::ledger::ReferralLedger;
use crate::metrics::ServerMetrics;

/// Shared state available to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<ReferralLedger>,
    /// Server-wide metrics (lock-free atomics)
    pub metrics: Arc<ServerMetrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full API router with all service endpoints
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(crate::metrics::prometheus_handler))
        .route("/metrics/json", get(crate::metrics::json_metrics_handler))
        .merge(referrals::routes())
        .merge(milestones::routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP API server on the given port
pub async fn start_api_server(
    ledger: Arc<ReferralLedger>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let metrics = ServerMetrics::new();
    let state = ApiState { ledger, metrics };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
