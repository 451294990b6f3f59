use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::json;

use crate::metrics::render_metrics;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

#[derive(Serialize)]
pub struct ReadyResponse<'a> {
    status: &'a str,
    store: StoreStatus<'a>,
}

#[derive(Serialize)]
pub struct StoreStatus<'a> {
    backend: &'a str,
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Sanctum",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// Readiness with cache store reachability.
///
/// The service stays ready without a store: reads go to the source of truth
/// and ticket issuance reports unavailable.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store = &state.store;
    let store_status = if !store.is_configured() {
        "absent"
    } else {
        match store.ping().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "Readiness probe: cache store unreachable");
                "unavailable"
            }
        }
    };

    let status = if store_status == "ok" { "ready" } else { "degraded" };
    (
        StatusCode::OK,
        Json(ReadyResponse {
            status,
            store: StoreStatus {
                backend: store.backend_name(),
                status: store_status,
            },
        }),
    )
}

pub async fn metrics() -> impl IntoResponse {
    match render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}
