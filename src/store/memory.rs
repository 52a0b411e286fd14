use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    AuditEntry, AuditLog, ElevationRequest, ElevationSession, ElevationStore, RequestStore, SessionEnd,
    SessionStore, StatusUpdate, StoreError, Transition,
};
use crate::types::{EndReason, RequestStatus, SubjectType};

#[derive(Default)]
struct State {
    requests: HashMap<Uuid, ElevationRequest>,
    sessions: HashMap<Uuid, ElevationSession>,
    audit: Vec<AuditEntry>,
    fail_audit: bool,
    fail_audit_subjects: HashSet<Uuid>,
    transient_failures: u32,
}

impl State {
    /// Consume one injected transient failure, if any are queued.
    fn injected_failure(&mut self) -> Result<(), StoreError> {
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(StoreError::Transient("injected transient failure".to_string()));
        }
        Ok(())
    }

    fn check_audit(&self, entries: &[&AuditEntry]) -> Result<(), StoreError> {
        if self.fail_audit {
            return Err(StoreError::AuditWrite("audit sink unavailable".to_string()));
        }
        if let Some(entry) = entries.iter().find(|e| self.fail_audit_subjects.contains(&e.subject_id)) {
            return Err(StoreError::AuditWrite(format!("audit sink refused subject {}", entry.subject_id)));
        }
        if let Some(dup) = entries.iter().find(|e| self.audit.iter().any(|a| a.id == e.id)) {
            return Err(StoreError::AuditWrite(format!("audit entry {} already written", dup.id)));
        }
        Ok(())
    }

    fn pending_for_target(&self, target_user_id: Uuid) -> Option<&ElevationRequest> {
        self.requests
            .values()
            .find(|r| r.target_user_id == target_user_id && r.status == RequestStatus::Pending)
    }

    fn open_for_target(&self, target_user_id: Uuid) -> Option<&ElevationSession> {
        self.sessions
            .values()
            .find(|s| s.target_user_id == target_user_id && s.is_open())
    }
}

/// In-process store with the same conditional-write semantics as Postgres.
/// One mutex guards all three tables, so every transition is atomic.
///
/// Also the fault-injection harness for broker tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every subsequent audit write fail until switched off.
    pub fn fail_audit_writes(&self, fail: bool) {
        self.lock().fail_audit = fail;
    }

    /// Make audit writes about one request or session fail until cleared.
    pub fn fail_audit_writes_for(&self, subject_id: Uuid) {
        self.lock().fail_audit_subjects.insert(subject_id);
    }

    pub fn clear_audit_failures(&self) {
        let mut state = self.lock();
        state.fail_audit = false;
        state.fail_audit_subjects.clear();
    }

    /// Make the next `count` store calls fail with a transient error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.lock().transient_failures = count;
    }

    pub fn audit_len(&self) -> usize {
        self.lock().audit.len()
    }
}

fn sorted_by_request_time(mut requests: Vec<ElevationRequest>) -> Vec<ElevationRequest> {
    requests.sort_by_key(|r| r.requested_at);
    requests
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn get_request(&self, id: Uuid) -> Result<Option<ElevationRequest>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        Ok(state.requests.get(&id).cloned())
    }

    async fn put_request(&self, request: &ElevationRequest, audit: &AuditEntry) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;

        if state.requests.contains_key(&request.id) {
            return Err(StoreError::Conflict(format!("request {} already exists", request.id)));
        }
        if request.status == RequestStatus::Pending && state.pending_for_target(request.target_user_id).is_some() {
            return Err(StoreError::Conflict(format!(
                "target {} already has a pending request",
                request.target_user_id
            )));
        }
        state.check_audit(&[audit])?;

        state.requests.insert(request.id, request.clone());
        state.audit.push(audit.clone());
        Ok(())
    }

    async fn update_request_status(
        &self,
        id: Uuid,
        expected: RequestStatus,
        update: StatusUpdate,
        audit: &AuditEntry,
    ) -> Result<Transition<RequestStatus>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;

        let current = match state.requests.get(&id) {
            Some(request) => request.status,
            None => return Ok(Transition::Missing),
        };
        if current != expected {
            return Ok(Transition::Stale(current));
        }
        state.check_audit(&[audit])?;

        if let Some(request) = state.requests.get_mut(&id) {
            request.status = update.status;
            request.decided_at = Some(update.decided_at);
            request.decided_by = Some(update.decided_by);
        }
        state.audit.push(audit.clone());
        Ok(Transition::Applied)
    }

    async fn pending_request_for_target(&self, target_user_id: Uuid) -> Result<Option<ElevationRequest>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        Ok(state.pending_for_target(target_user_id).cloned())
    }

    async fn pending_requests_by_admin(&self, admin_id: Uuid) -> Result<Vec<ElevationRequest>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        let requests = state
            .requests
            .values()
            .filter(|r| r.admin_id == admin_id && r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        Ok(sorted_by_request_time(requests))
    }

    async fn pending_requests_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ElevationRequest>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        let requests = state
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && r.requested_at < cutoff)
            .cloned()
            .collect();
        Ok(sorted_by_request_time(requests))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self, id: Uuid) -> Result<Option<ElevationSession>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        Ok(state.sessions.get(&id).cloned())
    }

    async fn end_session(
        &self,
        id: Uuid,
        end: SessionEnd,
        audit: &AuditEntry,
    ) -> Result<Transition<EndReason>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;

        match state.sessions.get(&id) {
            None => return Ok(Transition::Missing),
            Some(session) if !session.is_open() => {
                return Ok(Transition::Stale(session.end_reason.unwrap_or(EndReason::EndedBySystem)));
            }
            Some(_) => {}
        }
        state.check_audit(&[audit])?;

        if let Some(session) = state.sessions.get_mut(&id) {
            session.ended_at = Some(end.ended_at);
            session.end_reason = Some(end.reason);
            session.ended_by = Some(end.ended_by);
        }
        state.audit.push(audit.clone());
        Ok(Transition::Applied)
    }

    async fn open_session_for_target(&self, target_user_id: Uuid) -> Result<Option<ElevationSession>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        Ok(state.open_for_target(target_user_id).cloned())
    }

    async fn open_sessions_for_admin(&self, admin_id: Uuid) -> Result<Vec<ElevationSession>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.admin_id == admin_id && s.is_open())
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.started_at));
        Ok(sessions)
    }

    async fn open_sessions_expiring_by(&self, cutoff: DateTime<Utc>) -> Result<Vec<ElevationSession>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.is_open() && s.expires_at <= cutoff)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.expires_at);
        Ok(sessions)
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn entries_for(&self, subject_type: SubjectType, subject_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        // Append order is chronological order
        Ok(state
            .audit
            .iter()
            .filter(|e| e.subject_type == subject_type && e.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;
        Ok(state.audit.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl ElevationStore for MemoryStore {
    async fn approve_request(
        &self,
        request_id: Uuid,
        update: StatusUpdate,
        session: &ElevationSession,
        audit: &[AuditEntry],
    ) -> Result<Transition<RequestStatus>, StoreError> {
        let mut state = self.lock();
        state.injected_failure()?;

        let current = match state.requests.get(&request_id) {
            Some(request) => request.status,
            None => return Ok(Transition::Missing),
        };
        if current != RequestStatus::Pending {
            return Ok(Transition::Stale(current));
        }
        if state.sessions.values().any(|s| s.request_id == request_id) {
            return Err(StoreError::Conflict(format!("request {} already has a session", request_id)));
        }
        if state.open_for_target(session.target_user_id).is_some() {
            return Err(StoreError::Conflict(format!(
                "target {} already has an open session",
                session.target_user_id
            )));
        }
        let entries: Vec<&AuditEntry> = audit.iter().collect();
        state.check_audit(&entries)?;

        if let Some(request) = state.requests.get_mut(&request_id) {
            request.status = update.status;
            request.decided_at = Some(update.decided_at);
            request.decided_by = Some(update.decided_by);
        }
        state.sessions.insert(session.id, session.clone());
        state.audit.extend(audit.iter().cloned());
        Ok(Transition::Applied)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Actor, AuditTransition};
    use chrono::Duration;

    fn pending(target: Uuid) -> ElevationRequest {
        ElevationRequest::pending(Uuid::new_v4(), "ops@example.com", target, "user@example.com", None, Utc::now())
    }

    fn created(request: &ElevationRequest) -> AuditEntry {
        AuditEntry::new(AuditTransition::RequestCreated, request.id, Actor::Account(request.admin_id), request.requested_at)
    }

    #[tokio::test]
    async fn second_pending_request_for_target_conflicts() {
        let store = MemoryStore::new();
        let target = Uuid::new_v4();
        let first = pending(target);
        store.put_request(&first, &created(&first)).await.unwrap();

        let second = pending(target);
        let err = store.put_request(&second, &created(&second)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.audit_len(), 1);
    }

    #[tokio::test]
    async fn status_update_is_compare_and_set() {
        let store = MemoryStore::new();
        let request = pending(Uuid::new_v4());
        store.put_request(&request, &created(&request)).await.unwrap();

        let update = StatusUpdate {
            status: RequestStatus::Rejected,
            decided_by: Actor::Account(request.target_user_id),
            decided_at: Utc::now(),
        };
        let audit = AuditEntry::new(AuditTransition::RequestRejected, request.id, update.decided_by, update.decided_at);
        let first = store
            .update_request_status(request.id, RequestStatus::Pending, update, &audit)
            .await
            .unwrap();
        assert_eq!(first, Transition::Applied);

        let again = AuditEntry::new(AuditTransition::RequestExpired, request.id, Actor::System, Utc::now());
        let expire = StatusUpdate { status: RequestStatus::Expired, decided_by: Actor::System, decided_at: Utc::now() };
        let second = store
            .update_request_status(request.id, RequestStatus::Pending, expire, &again)
            .await
            .unwrap();
        assert_eq!(second, Transition::Stale(RequestStatus::Rejected));
        assert_eq!(store.audit_len(), 2);
    }

    #[tokio::test]
    async fn failed_audit_write_leaves_state_untouched() {
        let store = MemoryStore::new();
        let request = pending(Uuid::new_v4());
        store.fail_audit_writes(true);

        let err = store.put_request(&request, &created(&request)).await.unwrap_err();
        assert!(matches!(err, StoreError::AuditWrite(_)));
        assert!(store.get_request(request.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn approve_refuses_second_open_session_for_target() {
        let store = MemoryStore::new();
        let target = Uuid::new_v4();
        let now = Utc::now();

        let first = pending(target);
        store.put_request(&first, &created(&first)).await.unwrap();
        let update = StatusUpdate { status: RequestStatus::Approved, decided_by: Actor::Account(target), decided_at: now };
        let session = ElevationSession::start(&first, now, Duration::minutes(30));
        let outcome = store.approve_request(first.id, update, &session, &[]).await.unwrap();
        assert_eq!(outcome, Transition::Applied);

        let second = pending(target);
        store.put_request(&second, &created(&second)).await.unwrap();
        let other = ElevationSession::start(&second, now, Duration::minutes(30));
        let err = store.approve_request(second.id, update, &other, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_request(second.id).await.unwrap().unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn injected_transient_failures_are_consumed() {
        let store = MemoryStore::new();
        store.inject_transient_failures(2);
        assert!(store.get_request(Uuid::new_v4()).await.unwrap_err().is_transient());
        assert!(store.get_request(Uuid::new_v4()).await.unwrap_err().is_transient());
        assert!(store.get_request(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn audit_entries_are_never_rewritten() {
        let store = MemoryStore::new();
        let first = pending(Uuid::new_v4());
        let entry = created(&first);
        store.put_request(&first, &entry).await.unwrap();

        let second = pending(Uuid::new_v4());
        let err = store.put_request(&second, &entry).await.unwrap_err();
        assert!(matches!(err, StoreError::AuditWrite(_)));
        assert!(store.get_request(second.id).await.unwrap().is_none());
        assert_eq!(store.entries_for(SubjectType::Request, first.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_failure_can_target_one_subject() {
        let store = MemoryStore::new();
        let refused = pending(Uuid::new_v4());
        let accepted = pending(Uuid::new_v4());
        store.fail_audit_writes_for(refused.id);

        assert!(store.put_request(&refused, &created(&refused)).await.is_err());
        store.put_request(&accepted, &created(&accepted)).await.unwrap();

        store.clear_audit_failures();
        store.put_request(&refused, &created(&refused)).await.unwrap();
        assert_eq!(store.audit_len(), 2);
    }
}
