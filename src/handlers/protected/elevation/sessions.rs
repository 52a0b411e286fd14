use axum::{
    extract::{Path, State},
    Extension,
};
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::broker::EndOutcome;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::store::ElevationSession;
use crate::types::EndReason;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnded {
    /// False when the session had already been closed before this call.
    pub ended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
}

/// GET /api/elevation-sessions/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<ElevationSession> {
    let session = state.broker.get_session(&user.caller(), id).await?;
    Ok(ApiResponse::success(session))
}

/// POST /api/elevation-sessions/:id/end - Either party ends the session early
pub async fn end(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionEnded> {
    let body = match state.broker.end_session(&user.caller(), id).await? {
        EndOutcome::Ended => SessionEnded { ended: true, end_reason: None },
        EndOutcome::AlreadyEnded(reason) => SessionEnded { ended: false, end_reason: Some(reason) },
    };
    Ok(ApiResponse::success(body))
}
