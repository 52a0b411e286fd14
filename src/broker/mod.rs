//! Lifecycle controller for support-access elevation.
//!
//! Request:  Pending --approve--> Approved (session spawned)
//!           Pending --reject---> Rejected
//!           Pending --timeout--> Expired
//! Session:  Active --end (admin/user/system) or timeout--> Ended
//!
//! Every transition is a conditional write in the store, committed together
//! with its audit entry. Timers and the reaper are fallback enforcers: each
//! decision re-validates elapsed time from stored timestamps against the
//! server clock, so correctness never depends on a timer firing on time.

pub mod error;
pub mod reaper;
pub mod retry;

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ElevationConfig;
use crate::directory::AccountDirectory;
use crate::notify::{ElevationEvent, ElevationState, EventKind, PendingRequestView, SessionView, StateHub};
use crate::store::{
    AuditEntry, AuditLog, ElevationRequest, ElevationSession, ElevationStore, RequestStore, SessionEnd, SessionStore,
    StatusUpdate, StoreError, Transition,
};
use crate::timer::{delay_from, TimerKey, TimerService};
use crate::types::{Actor, AuditTransition, Decision, EndReason, RequestStatus, SubjectType};

pub use error::BrokerError;
pub use reaper::{spawn_reaper, SweepReport};
pub use retry::RetryPolicy;

/// Identity of whoever is calling, passed explicitly into every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub account_id: Uuid,
    pub email: String,
}

impl Caller {
    pub fn new(account_id: Uuid, email: impl Into<String>) -> Self {
        Self { account_id, email: email.into() }
    }

    fn actor(&self) -> Actor {
        Actor::Account(self.account_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    Approved(ElevationSession),
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended,
    /// Already closed earlier, with this reason. Not an error.
    AlreadyEnded(EndReason),
}

struct Inner {
    store: Arc<dyn ElevationStore>,
    directory: Arc<dyn AccountDirectory>,
    clock: Arc<dyn Clock>,
    timers: TimerService,
    hub: StateHub,
    config: ElevationConfig,
    retry: RetryPolicy,
}

/// Cheap to clone; clones share stores, timers and the event hub.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    pub fn new(
        store: Arc<dyn ElevationStore>,
        directory: Arc<dyn AccountDirectory>,
        clock: Arc<dyn Clock>,
        hub: StateHub,
        mut config: ElevationConfig,
    ) -> Self {
        config.sanitize();
        let retry = RetryPolicy::new(config.store_retry_attempts, config.retry_backoff());
        Self {
            inner: Arc::new(Inner {
                store,
                directory,
                clock,
                timers: TimerService::new(),
                hub,
                config,
                retry,
            }),
        }
    }

    pub fn config(&self) -> &ElevationConfig {
        &self.inner.config
    }

    pub fn hub(&self) -> &StateHub {
        &self.inner.hub
    }

    pub fn timers(&self) -> &TimerService {
        &self.inner.timers
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.clock.now()
    }

    fn store(&self) -> &dyn ElevationStore {
        self.inner.store.as_ref()
    }

    /// Stop every pending timer. Stored state is untouched; the reaper of the
    /// next process picks up anything overdue.
    pub fn shutdown(&self) {
        self.inner.timers.shutdown();
    }

    pub async fn ping(&self) -> Result<(), BrokerError> {
        self.store().ping().await.map_err(BrokerError::from)
    }

    // ---------------------------------------------------------------------
    // Caller-invoked operations
    // ---------------------------------------------------------------------

    /// An operator asks for access to the account registered under `target_email`.
    pub async fn create_request(
        &self,
        caller: &Caller,
        target_email: &str,
        reason: Option<&str>,
    ) -> Result<ElevationRequest, BrokerError> {
        self.require_operator(caller).await?;

        let reason = self.normalize_reason(reason)?;
        let target_email = target_email.trim();
        if target_email.is_empty() {
            return Err(BrokerError::InvalidInput("targetEmail is required".to_string()));
        }

        let directory = self.inner.directory.as_ref();
        let target = self
            .inner
            .retry
            .run("resolve target email", move || directory.resolve_email(target_email))
            .await?
            .ok_or_else(|| BrokerError::UnknownAccount(target_email.to_string()))?;

        if target.id == caller.account_id {
            return Err(BrokerError::InvalidInput(
                "Operators cannot request access to their own account".to_string(),
            ));
        }

        self.clear_stale_state_for(target.id, &target.email).await?;

        let now = self.now();
        let request = ElevationRequest::pending(caller.account_id, &caller.email, target.id, &target.email, reason, now);
        let audit = AuditEntry::new(AuditTransition::RequestCreated, request.id, caller.actor(), now).with_detail(json!({
            "targetUserId": target.id,
            "reason": request.reason,
        }));

        let store = self.store();
        let (request_ref, audit_ref) = (&request, &audit);
        match self
            .inner
            .retry
            .run("insert elevation request", move || store.put_request(request_ref, audit_ref))
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                tracing::warn!(
                    "Elevation request by {} for {} lost to a concurrent pending request",
                    caller.email,
                    target.email
                );
                return Err(BrokerError::AlreadyPending(target.email));
            }
            Err(e) => return Err(e.into()),
        }

        self.arm_approval_timer(&request);
        self.publish(EventKind::RequestCreated, request.id, request.admin_id, request.target_user_id);
        tracing::info!(
            "Elevation request {} created by {} for {} (window {}s)",
            request.id,
            caller.email,
            request.target_email,
            self.inner.config.approval_window_secs
        );
        Ok(request)
    }

    /// The target user answers a pending request.
    pub async fn decide(
        &self,
        caller: &Caller,
        request_id: Uuid,
        decision: Decision,
    ) -> Result<DecisionOutcome, BrokerError> {
        let request = self
            .fetch_request(request_id)
            .await?
            .ok_or_else(|| BrokerError::request_not_found(request_id))?;

        if request.target_user_id != caller.account_id {
            tracing::warn!("{} tried to decide request {} targeting someone else", caller.email, request_id);
            return Err(BrokerError::unauthorized(
                "Only the target of a request can approve or reject it",
            ));
        }

        match request.status {
            RequestStatus::Pending => {}
            status => return Err(race_error(status)),
        }

        // Server-authoritative window check; client countdowns are advisory
        let now = self.now();
        if request.window_elapsed(self.inner.config.approval_window(), now) {
            if let Err(e) = self.expire_request(&request, "late_decision").await {
                tracing::error!("Could not record expiry of late-decided request {}: {}", request.id, e);
            }
            return Err(BrokerError::Expired);
        }

        match decision {
            Decision::Approve => self.approve(caller, &request, now).await,
            Decision::Reject => self.reject(caller, &request, now).await,
        }
    }

    async fn approve(
        &self,
        caller: &Caller,
        request: &ElevationRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<DecisionOutcome, BrokerError> {
        let actor = caller.actor();
        let session = ElevationSession::start(request, now, self.inner.config.session_duration());
        let update = StatusUpdate { status: RequestStatus::Approved, decided_by: actor, decided_at: now };
        let audit = [
            AuditEntry::new(AuditTransition::RequestApproved, request.id, actor, now)
                .with_detail(json!({ "sessionId": session.id })),
            AuditEntry::new(AuditTransition::SessionStarted, session.id, actor, now).with_detail(json!({
                "requestId": request.id,
                "expiresAt": session.expires_at,
            })),
        ];

        let store = self.store();
        let (session_ref, audit_ref) = (&session, &audit[..]);
        let request_id = request.id;
        let outcome = self
            .inner
            .retry
            .run("approve elevation request", move || {
                store.approve_request(request_id, update, session_ref, audit_ref)
            })
            .await;

        match outcome {
            Ok(Transition::Applied) => {}
            Ok(Transition::Stale(status)) => return Err(race_error(status)),
            Ok(Transition::Missing) => return Err(BrokerError::request_not_found(request_id)),
            Err(StoreError::Conflict(_)) => return Err(BrokerError::ActiveSessionExists(request.target_email.clone())),
            Err(e) => return Err(e.into()),
        }

        self.inner.timers.cancel(TimerKey::Approval(request_id));
        self.arm_session_timer(&session);
        self.publish(EventKind::RequestApproved, request_id, request.admin_id, request.target_user_id);
        self.publish(EventKind::SessionStarted, session.id, session.admin_id, session.target_user_id);
        tracing::info!(
            "Elevation request {} approved by {}; session {} for {} expires at {}",
            request_id,
            caller.email,
            session.id,
            session.admin_email,
            session.expires_at
        );
        Ok(DecisionOutcome::Approved(session))
    }

    async fn reject(
        &self,
        caller: &Caller,
        request: &ElevationRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<DecisionOutcome, BrokerError> {
        let actor = caller.actor();
        let update = StatusUpdate { status: RequestStatus::Rejected, decided_by: actor, decided_at: now };
        let audit = AuditEntry::new(AuditTransition::RequestRejected, request.id, actor, now);

        match self.swap_request_status(request.id, update, &audit).await? {
            Transition::Applied => {}
            Transition::Stale(status) => return Err(race_error(status)),
            Transition::Missing => return Err(BrokerError::request_not_found(request.id)),
        }

        self.inner.timers.cancel(TimerKey::Approval(request.id));
        self.publish(EventKind::RequestRejected, request.id, request.admin_id, request.target_user_id);
        tracing::info!("Elevation request {} rejected by {}", request.id, caller.email);
        Ok(DecisionOutcome::Rejected)
    }

    /// Either party ends an open session early. Ending an ended session is a
    /// successful no-op.
    pub async fn end_session(&self, caller: &Caller, session_id: Uuid) -> Result<EndOutcome, BrokerError> {
        let session = self
            .fetch_session(session_id)
            .await?
            .ok_or_else(|| BrokerError::session_not_found(session_id))?;

        let reason = if caller.account_id == session.admin_id {
            EndReason::EndedByAdmin
        } else if caller.account_id == session.target_user_id {
            EndReason::EndedByUser
        } else {
            tracing::warn!("{} tried to end session {} they are not part of", caller.email, session_id);
            return Err(BrokerError::unauthorized("Only the operator or the account owner can end this session"));
        };

        self.close_session(session_id, caller.actor(), reason).await
    }

    /// Close a session with an explicit actor and reason. Idempotent.
    pub async fn close_session(
        &self,
        session_id: Uuid,
        ended_by: Actor,
        reason: EndReason,
    ) -> Result<EndOutcome, BrokerError> {
        let session = self
            .fetch_session(session_id)
            .await?
            .ok_or_else(|| BrokerError::session_not_found(session_id))?;
        if let Some(previous) = session.end_reason.filter(|_| !session.is_open()) {
            return Ok(EndOutcome::AlreadyEnded(previous));
        }

        let now = self.now();
        let end = SessionEnd { ended_at: now, reason, ended_by };
        let audit = AuditEntry::new(AuditTransition::SessionEnded, session_id, ended_by, now)
            .with_detail(json!({ "reason": reason.as_str() }));

        let store = self.store();
        let audit_ref = &audit;
        let outcome = self
            .inner
            .retry
            .run("end elevation session", move || store.end_session(session_id, end, audit_ref))
            .await?;

        match outcome {
            Transition::Applied => {
                self.inner.timers.cancel(TimerKey::SessionExpiry(session_id));
                self.publish(EventKind::SessionEnded, session_id, session.admin_id, session.target_user_id);
                tracing::info!("Elevation session {} ended ({}) by {}", session_id, reason.as_str(), ended_by);
                Ok(EndOutcome::Ended)
            }
            Transition::Stale(previous) => {
                tracing::debug!("Elevation session {} was already ended ({})", session_id, previous.as_str());
                Ok(EndOutcome::AlreadyEnded(previous))
            }
            Transition::Missing => Err(BrokerError::session_not_found(session_id)),
        }
    }

    /// Force-close every open session the account takes part in (sign-out).
    /// Returns how many sessions this call ended. A session that cannot be
    /// closed does not stop the others; the first such error is returned last.
    pub async fn on_account_signed_out(&self, account_id: Uuid) -> Result<usize, BrokerError> {
        let store = self.store();
        let sessions = self
            .inner
            .retry
            .run("list sessions for sign-out", move || store.open_sessions_involving(account_id))
            .await?;

        let mut ended = 0;
        let mut first_error = None;
        for session in sessions {
            match self.close_session(session.id, Actor::System, EndReason::EndedBySystem).await {
                Ok(EndOutcome::Ended) => ended += 1,
                Ok(EndOutcome::AlreadyEnded(_)) => {}
                Err(e) => {
                    tracing::error!("Sign-out of {} could not end session {}: {}", account_id, session.id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(ended),
        }
    }

    // ---------------------------------------------------------------------
    // Timer callbacks
    // ---------------------------------------------------------------------

    /// Approval window timer. Only a still-Pending, actually elapsed request
    /// is expired; anything else is a no-op. Returns whether it transitioned.
    pub async fn on_approval_window_elapsed(&self, request_id: Uuid) -> Result<bool, BrokerError> {
        let Some(request) = self.fetch_request(request_id).await? else {
            tracing::debug!("Approval timer for unknown request {}", request_id);
            return Ok(false);
        };
        if request.status != RequestStatus::Pending {
            tracing::debug!("Approval timer for request {} already {}", request_id, request.status.as_str());
            return Ok(false);
        }
        if !request.window_elapsed(self.inner.config.approval_window(), self.now()) {
            // Fired early against the authoritative clock; try again later
            self.arm_approval_timer(&request);
            return Ok(false);
        }
        self.expire_request(&request, "approval_timer").await
    }

    /// Session expiry timer. Returns whether it ended the session.
    pub async fn on_session_window_elapsed(&self, session_id: Uuid) -> Result<bool, BrokerError> {
        let Some(session) = self.fetch_session(session_id).await? else {
            tracing::debug!("Expiry timer for unknown session {}", session_id);
            return Ok(false);
        };
        if !session.is_open() {
            return Ok(false);
        }
        if self.now() < session.expires_at {
            self.arm_session_timer(&session);
            return Ok(false);
        }
        let outcome = self.close_session(session_id, Actor::System, EndReason::Expired).await?;
        Ok(outcome == EndOutcome::Ended)
    }

    /// Expire every overdue request and session regardless of timers.
    pub async fn sweep_overdue(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.now();
        let store = self.store();

        let cutoff = now - self.inner.config.approval_window();
        match self
            .inner
            .retry
            .run("list overdue requests", move || store.pending_requests_before(cutoff))
            .await
        {
            Ok(requests) => {
                for request in requests {
                    match self.expire_request(&request, "reaper").await {
                        Ok(true) => report.requests_expired += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!("Reaper could not expire request {}: {}", request.id, e);
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("Reaper could not list overdue requests: {}", e);
                report.failures += 1;
            }
        }

        match self
            .inner
            .retry
            .run("list overdue sessions", move || store.open_sessions_expiring_by(now))
            .await
        {
            Ok(sessions) => {
                for session in sessions {
                    match self.close_session(session.id, Actor::System, EndReason::Expired).await {
                        Ok(EndOutcome::Ended) => report.sessions_ended += 1,
                        Ok(EndOutcome::AlreadyEnded(_)) => {}
                        Err(e) => {
                            tracing::error!("Reaper could not end session {}: {}", session.id, e);
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("Reaper could not list overdue sessions: {}", e);
                report.failures += 1;
            }
        }

        report
    }

    // ---------------------------------------------------------------------
    // Read side
    // ---------------------------------------------------------------------

    /// Snapshot of what `caller` should see right now.
    pub async fn state_for(&self, caller: &Caller) -> Result<ElevationState, BrokerError> {
        let me = caller.account_id;
        let now = self.now();
        let window = self.inner.config.approval_window();
        let store = self.store();
        let retry = &self.inner.retry;

        let pending_request_for_me = retry
            .run("load pending request", move || store.pending_request_for_target(me))
            .await?
            .and_then(|r| PendingRequestView::build(&r, window, me, now));

        let outgoing_requests = retry
            .run("load outgoing requests", move || store.pending_requests_by_admin(me))
            .await?
            .iter()
            .filter_map(|r| PendingRequestView::build(r, window, me, now))
            .collect();

        let mut active_session_involving_me = retry
            .run("load target session", move || store.open_session_for_target(me))
            .await?
            .and_then(|s| SessionView::build(&s, me, now));
        if active_session_involving_me.is_none() {
            active_session_involving_me = retry
                .run("load admin sessions", move || store.open_sessions_for_admin(me))
                .await?
                .iter()
                .find_map(|s| SessionView::build(s, me, now));
        }

        Ok(ElevationState {
            pending_request_for_me,
            outgoing_requests,
            active_session_involving_me,
            generated_at: Some(now),
        })
    }

    /// A request, visible to its two parties and to operators.
    pub async fn get_request(&self, caller: &Caller, request_id: Uuid) -> Result<ElevationRequest, BrokerError> {
        let request = self
            .fetch_request(request_id)
            .await?
            .ok_or_else(|| BrokerError::request_not_found(request_id))?;
        if !request.involves(caller.account_id) {
            self.require_operator(caller).await?;
        }
        Ok(request)
    }

    /// A session, visible to its two parties and to operators.
    pub async fn get_session(&self, caller: &Caller, session_id: Uuid) -> Result<ElevationSession, BrokerError> {
        let session = self
            .fetch_session(session_id)
            .await?
            .ok_or_else(|| BrokerError::session_not_found(session_id))?;
        if !session.involves(caller.account_id) {
            self.require_operator(caller).await?;
        }
        Ok(session)
    }

    /// Audit history of one request or session (operators only).
    pub async fn audit_trail(
        &self,
        caller: &Caller,
        subject_type: SubjectType,
        subject_id: Uuid,
    ) -> Result<Vec<AuditEntry>, BrokerError> {
        self.require_operator(caller).await?;
        let store = self.store();
        Ok(self
            .inner
            .retry
            .run("load audit trail", move || store.entries_for(subject_type, subject_id))
            .await?)
    }

    /// Newest audit entries across all subjects (operators only).
    pub async fn recent_audit(&self, caller: &Caller, limit: usize) -> Result<Vec<AuditEntry>, BrokerError> {
        self.require_operator(caller).await?;
        let store = self.store();
        let limit = limit.clamp(1, 500);
        Ok(self.inner.retry.run("load recent audit", move || store.recent(limit)).await?)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    async fn require_operator(&self, caller: &Caller) -> Result<(), BrokerError> {
        let directory = self.inner.directory.as_ref();
        let account_id = caller.account_id;
        let allowed = self
            .inner
            .retry
            .run("check operator capability", move || directory.has_operator_capability(account_id))
            .await?;
        if !allowed {
            tracing::warn!("{} ({}) lacks operator capability", caller.email, caller.account_id);
            return Err(BrokerError::unauthorized("Operator capability required"));
        }
        Ok(())
    }

    fn normalize_reason(&self, reason: Option<&str>) -> Result<Option<String>, BrokerError> {
        let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        let max = self.inner.config.max_reason_chars;
        if reason.chars().count() > max {
            return Err(BrokerError::InvalidInput(format!("reason must be at most {} characters", max)));
        }
        Ok(Some(reason.to_string()))
    }

    /// Before a new request: fail fast on a live pending request or session
    /// for the target, and retire ones whose time has already run out.
    async fn clear_stale_state_for(&self, target_id: Uuid, target_email: &str) -> Result<(), BrokerError> {
        let now = self.now();
        let store = self.store();

        let pending = self
            .inner
            .retry
            .run("load pending request", move || store.pending_request_for_target(target_id))
            .await?;
        if let Some(pending) = pending {
            if !pending.window_elapsed(self.inner.config.approval_window(), now) {
                return Err(BrokerError::AlreadyPending(target_email.to_string()));
            }
            self.expire_request(&pending, "superseded").await?;
        }

        let open = self
            .inner
            .retry
            .run("load open session", move || store.open_session_for_target(target_id))
            .await?;
        if let Some(session) = open {
            if session.is_live(now) {
                return Err(BrokerError::ActiveSessionExists(target_email.to_string()));
            }
            self.close_session(session.id, Actor::System, EndReason::Expired).await?;
        }
        Ok(())
    }

    /// Pending -> Expired through the conditional-write path.
    async fn expire_request(&self, request: &ElevationRequest, trigger: &'static str) -> Result<bool, BrokerError> {
        let now = self.now();
        let update = StatusUpdate { status: RequestStatus::Expired, decided_by: Actor::System, decided_at: now };
        let audit = AuditEntry::new(AuditTransition::RequestExpired, request.id, Actor::System, now)
            .with_detail(json!({ "trigger": trigger }));

        match self.swap_request_status(request.id, update, &audit).await? {
            Transition::Applied => {
                self.inner.timers.cancel(TimerKey::Approval(request.id));
                self.publish(EventKind::RequestExpired, request.id, request.admin_id, request.target_user_id);
                tracing::info!("Elevation request {} expired ({})", request.id, trigger);
                Ok(true)
            }
            Transition::Stale(status) => {
                tracing::debug!("Request {} already {} when expiring ({})", request.id, status.as_str(), trigger);
                Ok(false)
            }
            Transition::Missing => Ok(false),
        }
    }

    async fn swap_request_status(
        &self,
        request_id: Uuid,
        update: StatusUpdate,
        audit: &AuditEntry,
    ) -> Result<Transition<RequestStatus>, BrokerError> {
        let store = self.store();
        Ok(self
            .inner
            .retry
            .run("update request status", move || {
                store.update_request_status(request_id, RequestStatus::Pending, update, audit)
            })
            .await?)
    }

    async fn fetch_request(&self, request_id: Uuid) -> Result<Option<ElevationRequest>, BrokerError> {
        let store = self.store();
        Ok(self.inner.retry.run("load request", move || store.get_request(request_id)).await?)
    }

    async fn fetch_session(&self, session_id: Uuid) -> Result<Option<ElevationSession>, BrokerError> {
        let store = self.store();
        Ok(self.inner.retry.run("load session", move || store.get_session(session_id)).await?)
    }

    fn arm_approval_timer(&self, request: &ElevationRequest) {
        let deadline = request.approval_deadline(self.inner.config.approval_window());
        // One tick past the deadline: the window is open up to and including it
        let delay = delay_from(deadline - self.now()) + std::time::Duration::from_millis(1);
        let broker = self.clone();
        let request_id = request.id;
        self.inner.timers.schedule(TimerKey::Approval(request_id), delay, async move {
            if let Err(e) = broker.on_approval_window_elapsed(request_id).await {
                tracing::error!("Approval timer for request {} failed: {}", request_id, e);
            }
        });
    }

    fn arm_session_timer(&self, session: &ElevationSession) {
        let delay = delay_from(session.expires_at - self.now());
        let broker = self.clone();
        let session_id = session.id;
        self.inner.timers.schedule(TimerKey::SessionExpiry(session_id), delay, async move {
            if let Err(e) = broker.on_session_window_elapsed(session_id).await {
                tracing::error!("Expiry timer for session {} failed: {}", session_id, e);
            }
        });
    }

    fn publish(&self, kind: EventKind, subject_id: Uuid, admin_id: Uuid, target_user_id: Uuid) {
        self.inner.hub.publish(ElevationEvent { kind, subject_id, admin_id, target_user_id });
    }
}

/// Error for a request found in `status` when a decision expected Pending.
fn race_error(status: RequestStatus) -> BrokerError {
    match status {
        RequestStatus::Expired => BrokerError::Expired,
        other => BrokerError::AlreadyDecided(other),
    }
}
