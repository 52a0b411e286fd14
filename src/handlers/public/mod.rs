// Public handlers, no bearer token required

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub armed_timers: usize,
}

/// GET / - Service description
pub async fn root() -> ApiResponse<Value> {
    ApiResponse::success(json!({
        "name": "Support Access Broker",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Consent-gated, time-boxed operator access to user accounts",
        "routes": [
            "GET /health",
            "POST /api/elevation-requests",
            "GET /api/elevation-requests/:id",
            "POST /api/elevation-requests/:id/approve",
            "POST /api/elevation-requests/:id/reject",
            "GET /api/elevation-sessions/:id",
            "POST /api/elevation-sessions/:id/end",
            "GET /api/elevation-state",
            "GET /api/elevation-state/stream",
            "GET /api/elevation-audit",
            "GET /api/auth/whoami",
            "DELETE /api/auth/session",
        ],
    }))
}

/// GET /health - 200 while the store answers, 503 otherwise
pub async fn health(State(state): State<AppState>) -> ApiResult<Health> {
    state.broker.ping().await.map_err(|e| {
        tracing::warn!("Health check failed: {}", e);
        ApiError::service_unavailable("Store unavailable")
    })?;

    Ok(ApiResponse::success(Health {
        status: "ok",
        timestamp: Utc::now(),
        armed_timers: state.broker.timers().armed_count(),
    }))
}
