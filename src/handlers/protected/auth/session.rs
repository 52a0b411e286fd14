use axum::{extract::State, Extension};
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::directory::AccountDirectory;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmI {
    pub account_id: Uuid,
    pub email: String,
    pub operator: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOut {
    pub sessions_ended: usize,
}

/// GET /api/auth/whoami - Current account and whether it may request elevation
pub async fn whoami(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<WhoAmI> {
    let operator = state.directory.has_operator_capability(user.account_id).await.map_err(|e| {
        tracing::error!("Capability lookup failed for {}: {}", user.account_id, e);
        ApiError::service_unavailable("Account directory temporarily unavailable")
    })?;

    Ok(ApiResponse::success(WhoAmI {
        account_id: user.account_id,
        email: user.email,
        operator,
    }))
}

/// DELETE /api/auth/session - Sign-out hook
///
/// Every open elevated session the account takes part in is force-closed
/// (reason `ended_by_system`) before the sign-out is acknowledged.
pub async fn logout(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> ApiResult<SignedOut> {
    let sessions_ended = state.broker.on_account_signed_out(user.account_id).await?;
    if sessions_ended > 0 {
        tracing::info!("Sign-out of {} closed {} elevated session(s)", user.email, sessions_ended);
    }
    Ok(ApiResponse::success(SignedOut { sessions_ended }))
}
