use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{Actor, AuditTransition, EndReason, RequestStatus, SubjectType};

/// An operator's request for consented access to a target account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElevationRequest {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub admin_email: String,
    pub target_user_id: Uuid,
    pub target_email: String,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub status: RequestStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<Actor>,
}

impl ElevationRequest {
    pub fn pending(
        admin_id: Uuid,
        admin_email: impl Into<String>,
        target_user_id: Uuid,
        target_email: impl Into<String>,
        reason: Option<String>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            admin_id,
            admin_email: admin_email.into(),
            target_user_id,
            target_email: target_email.into(),
            reason,
            requested_at,
            status: RequestStatus::Pending,
            decided_at: None,
            decided_by: None,
        }
    }

    /// Last instant at which a decision is still accepted.
    pub fn approval_deadline(&self, window: Duration) -> DateTime<Utc> {
        self.requested_at + window
    }

    /// `now > requestedAt + window`, recomputed from the stored timestamp.
    pub fn window_elapsed(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now > self.approval_deadline(window)
    }

    pub fn involves(&self, account_id: Uuid) -> bool {
        self.admin_id == account_id || self.target_user_id == account_id
    }
}

/// Elevated access granted by exactly one approved request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElevationSession {
    pub id: Uuid,
    pub request_id: Uuid,
    pub admin_id: Uuid,
    pub admin_email: String,
    pub target_user_id: Uuid,
    pub target_email: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    pub ended_by: Option<Actor>,
}

impl ElevationSession {
    /// Session spawned by approving `request` at `now`.
    pub fn start(request: &ElevationRequest, now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: request.id,
            admin_id: request.admin_id,
            admin_email: request.admin_email.clone(),
            target_user_id: request.target_user_id,
            target_email: request.target_email.clone(),
            started_at: now,
            expires_at: now + duration,
            ended_at: None,
            end_reason: None,
            ended_by: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Open and not yet past its hard expiry at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now < self.expires_at
    }

    pub fn involves(&self, account_id: Uuid) -> bool {
        self.admin_id == account_id || self.target_user_id == account_id
    }
}

/// Immutable record of one lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub subject_type: SubjectType,
    pub subject_id: Uuid,
    pub transition: AuditTransition,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub detail: Value,
}

impl AuditEntry {
    pub fn new(transition: AuditTransition, subject_id: Uuid, actor: Actor, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_type: transition.subject_type(),
            subject_id,
            transition,
            actor,
            at,
            detail: Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_at(at: DateTime<Utc>) -> ElevationRequest {
        ElevationRequest::pending(
            Uuid::new_v4(),
            "ops@example.com",
            Uuid::new_v4(),
            "user@example.com",
            None,
            at,
        )
    }

    #[test]
    fn window_elapses_strictly_after_deadline() {
        let t0 = Utc::now();
        let request = request_at(t0);
        let window = Duration::minutes(5);
        assert!(!request.window_elapsed(window, t0 + window));
        assert!(request.window_elapsed(window, t0 + window + Duration::milliseconds(1)));
    }

    #[test]
    fn session_copies_parties_from_request() {
        let t0 = Utc::now();
        let request = request_at(t0);
        let session = ElevationSession::start(&request, t0 + Duration::minutes(2), Duration::minutes(30));
        assert_eq!(session.request_id, request.id);
        assert_eq!(session.target_user_id, request.target_user_id);
        assert_eq!(session.expires_at, t0 + Duration::minutes(32));
        assert!(session.is_live(t0 + Duration::minutes(31)));
        assert!(!session.is_live(t0 + Duration::minutes(32)));
    }

    #[test]
    fn audit_entry_derives_subject_type() {
        let entry = AuditEntry::new(AuditTransition::SessionStarted, Uuid::new_v4(), Actor::System, Utc::now());
        assert_eq!(entry.subject_type, SubjectType::Session);
    }
}
