//! Durable state of the broker: requests, sessions and the audit trail.
//!
//! Every mutation is a conditional write against an expected prior state and
//! carries the audit entries for the transition, which the store commits in
//! the same atomic unit. A store that cannot write the audit entry must not
//! apply the state change.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Actor, EndReason, RequestStatus, SubjectType};

pub use memory::MemoryStore;
pub use models::{AuditEntry, ElevationRequest, ElevationSession};
pub use postgres::PgStore;

/// Errors from request/session/audit stores
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// A uniqueness guard rejected the write (second pending request or open session).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Worth retrying: connection loss, serialization failure, deadlock.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// The audit entry could not be written; the transition was rolled back.
    #[error("Audit write failed: {0}")]
    AuditWrite(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Outcome of a compare-and-set on a record's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// The record was in the expected state and has been updated.
    Applied,
    /// Someone else got there first; carries the state actually stored.
    Stale(S),
    Missing,
}

/// Terminal status change for a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: RequestStatus,
    pub decided_by: Actor,
    pub decided_at: DateTime<Utc>,
}

/// Fields written when a session closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    pub ended_at: DateTime<Utc>,
    pub reason: EndReason,
    pub ended_by: Actor,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn get_request(&self, id: Uuid) -> Result<Option<ElevationRequest>, StoreError>;

    /// Insert a new Pending request. Fails with `Conflict` if the target already
    /// has a Pending request.
    async fn put_request(&self, request: &ElevationRequest, audit: &AuditEntry) -> Result<(), StoreError>;

    /// Move a request out of `expected` status; applied only if the stored
    /// status still equals `expected`.
    async fn update_request_status(
        &self,
        id: Uuid,
        expected: RequestStatus,
        update: StatusUpdate,
        audit: &AuditEntry,
    ) -> Result<Transition<RequestStatus>, StoreError>;

    async fn pending_request_for_target(&self, target_user_id: Uuid) -> Result<Option<ElevationRequest>, StoreError>;

    async fn pending_requests_by_admin(&self, admin_id: Uuid) -> Result<Vec<ElevationRequest>, StoreError>;

    /// Pending requests created strictly before `cutoff` (reaper input).
    async fn pending_requests_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ElevationRequest>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, id: Uuid) -> Result<Option<ElevationSession>, StoreError>;

    /// Close an open session. `Stale` carries the reason it was already closed with.
    async fn end_session(
        &self,
        id: Uuid,
        end: SessionEnd,
        audit: &AuditEntry,
    ) -> Result<Transition<EndReason>, StoreError>;

    async fn open_session_for_target(&self, target_user_id: Uuid) -> Result<Option<ElevationSession>, StoreError>;

    async fn open_sessions_for_admin(&self, admin_id: Uuid) -> Result<Vec<ElevationSession>, StoreError>;

    /// Open sessions whose `expires_at` is at or before `cutoff` (reaper input).
    async fn open_sessions_expiring_by(&self, cutoff: DateTime<Utc>) -> Result<Vec<ElevationSession>, StoreError>;

    /// Open sessions where the account is either party.
    async fn open_sessions_involving(&self, account_id: Uuid) -> Result<Vec<ElevationSession>, StoreError> {
        let mut sessions = self.open_sessions_for_admin(account_id).await?;
        if let Some(session) = self.open_session_for_target(account_id).await? {
            if !sessions.iter().any(|s| s.id == session.id) {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

/// Read side of the audit log. Entries are only ever written together with
/// the state change they describe, through the request and session writes.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// History of one subject, oldest first.
    async fn entries_for(&self, subject_type: SubjectType, subject_id: Uuid) -> Result<Vec<AuditEntry>, StoreError>;

    /// Most recent entries across all subjects, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError>;
}

/// Everything the broker persists, plus the one cross-table transition.
#[async_trait]
pub trait ElevationStore: RequestStore + SessionStore + AuditLog {
    /// Atomically: Pending -> Approved on the request, insert `session`, append
    /// `audit`. Fails with `Conflict` if the target already has an open session.
    async fn approve_request(
        &self,
        request_id: Uuid,
        update: StatusUpdate,
        session: &ElevationSession,
        audit: &[AuditEntry],
    ) -> Result<Transition<RequestStatus>, StoreError>;

    /// Cheap liveness probe for /health.
    async fn ping(&self) -> Result<(), StoreError>;
}
