use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::broker::BrokerError;

/// Error returned to HTTP clients as `{ "error": true, "message", "code" }`.
///
/// `code` is stable and machine-readable; `message` is safe to show a user and
/// never carries storage details.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_JSON", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 409 with a code naming which guard tripped
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// 410, the approval window has closed
    pub fn expired(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, "EXPIRED", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "message": self.message,
            "code": self.code,
        })
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        let message = err.to_string();
        match err {
            BrokerError::NotFound { .. } | BrokerError::UnknownAccount(_) => ApiError::not_found(message),
            BrokerError::AlreadyPending(_) => ApiError::conflict("ALREADY_PENDING", message),
            BrokerError::ActiveSessionExists(_) => ApiError::conflict("ACTIVE_SESSION_EXISTS", message),
            BrokerError::AlreadyDecided(_) => ApiError::conflict("ALREADY_DECIDED", message),
            BrokerError::Expired => ApiError::expired(message),
            BrokerError::Unauthorized(_) => ApiError::forbidden(message),
            BrokerError::InvalidInput(_) => ApiError::bad_request(message),
            BrokerError::AuditWriteFailure(msg) => {
                // Don't expose storage details to clients
                tracing::error!("Audit write failed, transition rolled back: {}", msg);
                ApiError::internal_server_error("The change could not be recorded and was not applied")
            }
            BrokerError::Store(msg) => {
                tracing::error!("Store error: {}", msg);
                ApiError::service_unavailable("Storage temporarily unavailable")
            }
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ApiError::invalid_json(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.to_json())).into_response()
    }
}
