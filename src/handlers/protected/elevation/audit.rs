use axum::{
    extract::{Query, State},
    Extension,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::store::AuditEntry;
use crate::types::SubjectType;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub subject_type: Option<String>,
    pub subject_id: Option<Uuid>,
    pub limit: Option<usize>,
}

/// GET /api/elevation-audit - Audit history (operators only)
///
/// With `subjectType` and `subjectId`: the full history of that request or
/// session, oldest first. Without: the newest `limit` entries (default 50).
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Vec<AuditEntry>> {
    let caller = user.caller();
    let entries = match (query.subject_type.as_deref(), query.subject_id) {
        (Some(kind), Some(id)) => {
            let subject_type: SubjectType = kind.parse().map_err(|e| ApiError::bad_request(format!("{}", e)))?;
            state.broker.audit_trail(&caller, subject_type, id).await?
        }
        (None, None) => state.broker.recent_audit(&caller, query.limit.unwrap_or(50)).await?,
        _ => return Err(ApiError::bad_request("subjectType and subjectId must be given together")),
    };
    Ok(ApiResponse::success(entries))
}
