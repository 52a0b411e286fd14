use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;
use crate::types::RequestStatus;

/// Failures surfaced to the admin or target user. Each one is a
/// security-relevant decision, so none of them is swallowed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrokerError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("No account is registered for '{0}'")]
    UnknownAccount(String),

    #[error("A pending access request already exists for {0}")]
    AlreadyPending(String),

    #[error("An elevated session is already active for {0}")]
    ActiveSessionExists(String),

    #[error("Request has already been decided (status: {})", .0.as_str())]
    AlreadyDecided(RequestStatus),

    #[error("The approval window for this request has elapsed")]
    Expired,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Audit log write failed; the change was not applied: {0}")]
    AuditWriteFailure(String),

    #[error("Store unavailable: {0}")]
    Store(String),
}

impl BrokerError {
    pub fn request_not_found(id: Uuid) -> Self {
        BrokerError::NotFound { kind: "Elevation request", id }
    }

    pub fn session_not_found(id: Uuid) -> Self {
        BrokerError::NotFound { kind: "Elevation session", id }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        BrokerError::Unauthorized(message.into())
    }
}

impl From<StoreError> for BrokerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AuditWrite(msg) => BrokerError::AuditWriteFailure(msg),
            other => BrokerError::Store(other.to_string()),
        }
    }
}
