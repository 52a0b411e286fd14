use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::broker::DecisionOutcome;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::store::ElevationRequest;
use crate::types::{Decision, RequestStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    pub target_email: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRequest {
    pub request_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedRequest {
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRequest {
    pub request_id: Uuid,
    pub status: RequestStatus,
}

/// POST /api/elevation-requests - Operator asks for access to an account
///
/// ```json
/// { "targetEmail": "user@example.com", "reason": "ticket #123" }
/// ```
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateRequestBody>, JsonRejection>,
) -> ApiResult<CreatedRequest> {
    let Json(body) = payload?;
    let request = state
        .broker
        .create_request(&user.caller(), &body.target_email, body.reason.as_deref())
        .await?;
    let expires_at = request.approval_deadline(state.broker.config().approval_window());

    let location = format!("/api/elevation-requests/{}", request.id);
    Ok(ApiResponse::created(CreatedRequest { request_id: request.id, expires_at }, location))
}

/// GET /api/elevation-requests/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<ElevationRequest> {
    let request = state.broker.get_request(&user.caller(), id).await?;
    Ok(ApiResponse::success(request))
}

/// POST /api/elevation-requests/:id/approve - Target grants access
pub async fn approve(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<ApprovedRequest> {
    match state.broker.decide(&user.caller(), id, Decision::Approve).await? {
        DecisionOutcome::Approved(session) => Ok(ApiResponse::success(ApprovedRequest {
            session_id: session.id,
            expires_at: session.expires_at,
        })),
        DecisionOutcome::Rejected => Err(crate::error::ApiError::internal_server_error(
            "Approval produced a rejection",
        )),
    }
}

/// POST /api/elevation-requests/:id/reject - Target declines
pub async fn reject(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<RejectedRequest> {
    state.broker.decide(&user.caller(), id, Decision::Reject).await?;
    Ok(ApiResponse::success(RejectedRequest { request_id: id, status: RequestStatus::Rejected }))
}
