use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    AuditEntry, AuditLog, ElevationRequest, ElevationSession, ElevationStore, RequestStore, SessionEnd,
    SessionStore, StatusUpdate, StoreError, Transition,
};
use crate::types::{EndReason, RequestStatus, SubjectType};

const REQUEST_COLUMNS: &str = "id, admin_id, admin_email, target_user_id, target_email, reason, \
     requested_at, status, decided_at, decided_by";

const SESSION_COLUMNS: &str = "id, request_id, admin_id, admin_email, target_user_id, target_email, \
     started_at, expires_at, ended_at, end_reason, ended_by";

const AUDIT_COLUMNS: &str = "id, subject_type, subject_id, transition, actor, at, detail";

#[derive(Debug, FromRow)]
struct RequestRow {
    id: Uuid,
    admin_id: Uuid,
    admin_email: String,
    target_user_id: Uuid,
    target_email: String,
    reason: Option<String>,
    requested_at: DateTime<Utc>,
    status: String,
    decided_at: Option<DateTime<Utc>>,
    decided_by: Option<String>,
}

impl TryFrom<RequestRow> for ElevationRequest {
    type Error = StoreError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            admin_id: row.admin_id,
            admin_email: row.admin_email,
            target_user_id: row.target_user_id,
            target_email: row.target_email,
            reason: row.reason,
            requested_at: row.requested_at,
            status: row.status.parse().map_err(corrupt)?,
            decided_at: row.decided_at,
            decided_by: row.decided_by.map(|a| a.parse()).transpose().map_err(corrupt)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    request_id: Uuid,
    admin_id: Uuid,
    admin_email: String,
    target_user_id: Uuid,
    target_email: String,
    started_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    end_reason: Option<String>,
    ended_by: Option<String>,
}

impl TryFrom<SessionRow> for ElevationSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            admin_id: row.admin_id,
            admin_email: row.admin_email,
            target_user_id: row.target_user_id,
            target_email: row.target_email,
            started_at: row.started_at,
            expires_at: row.expires_at,
            ended_at: row.ended_at,
            end_reason: row.end_reason.map(|r| r.parse()).transpose().map_err(corrupt)?,
            ended_by: row.ended_by.map(|a| a.parse()).transpose().map_err(corrupt)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    subject_type: String,
    subject_id: Uuid,
    transition: String,
    actor: String,
    at: DateTime<Utc>,
    detail: Option<Value>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            subject_type: row.subject_type.parse().map_err(corrupt)?,
            subject_id: row.subject_id,
            transition: row.transition.parse().map_err(corrupt)?,
            actor: row.actor.parse().map_err(corrupt)?,
            at: row.at,
            detail: row.detail.unwrap_or(Value::Null),
        })
    }
}

fn corrupt(err: crate::types::ParseEnumError) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

/// Sort sqlx failures into the store taxonomy.
pub fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // unique_violation
            Some("23505") => StoreError::Conflict(db.message().to_string()),
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => StoreError::Transient(db.message().to_string()),
            _ => StoreError::Backend(err.to_string()),
        },
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

/// Postgres-backed store. Uniqueness invariants live in partial unique
/// indexes; transitions are conditional UPDATEs sharing a transaction with
/// their audit inserts.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(classify)
    }

    async fn insert_audit(tx: &mut Transaction<'static, Postgres>, entry: &AuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO elevation_audit (id, subject_type, subject_id, transition, actor, at, detail)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.subject_type.as_str())
        .bind(entry.subject_id)
        .bind(entry.transition.as_str())
        .bind(entry.actor.to_string())
        .bind(entry.at)
        .bind(&entry.detail)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            tracing::error!("Audit insert for {} {} failed: {}", entry.subject_type.as_str(), entry.subject_id, e);
            StoreError::AuditWrite(e.to_string())
        })?;
        Ok(())
    }

    async fn current_status(
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
    ) -> Result<Transition<RequestStatus>, StoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM elevation_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(classify)?;
        match status {
            Some(status) => Ok(Transition::Stale(status.parse().map_err(corrupt)?)),
            None => Ok(Transition::Missing),
        }
    }

    /// Conditional `expected -> update.status` on one request row.
    async fn swap_status(
        tx: &mut Transaction<'static, Postgres>,
        id: Uuid,
        expected: RequestStatus,
        update: StatusUpdate,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE elevation_requests
             SET status = $3, decided_at = $4, decided_by = $5
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(update.status.as_str())
        .bind(update.decided_at)
        .bind(update.decided_by.to_string())
        .execute(&mut **tx)
        .await
        .map_err(classify)?;
        Ok(result.rows_affected() == 1)
    }

    async fn fetch_requests<T>(&self, sql: &str, param: T) -> Result<Vec<ElevationRequest>, StoreError>
    where
        T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    {
        let rows: Vec<RequestRow> = sqlx::query_as(sql)
            .bind(param)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        rows.into_iter().map(ElevationRequest::try_from).collect()
    }

    async fn fetch_sessions<T>(&self, sql: &str, param: T) -> Result<Vec<ElevationSession>, StoreError>
    where
        T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    {
        let rows: Vec<SessionRow> = sqlx::query_as(sql)
            .bind(param)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        rows.into_iter().map(ElevationSession::try_from).collect()
    }
}

#[async_trait]
impl RequestStore for PgStore {
    async fn get_request(&self, id: Uuid) -> Result<Option<ElevationRequest>, StoreError> {
        let sql = format!("SELECT {} FROM elevation_requests WHERE id = $1", REQUEST_COLUMNS);
        Ok(self.fetch_requests(&sql, id).await?.into_iter().next())
    }

    async fn put_request(&self, request: &ElevationRequest, audit: &AuditEntry) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            "INSERT INTO elevation_requests
             (id, admin_id, admin_email, target_user_id, target_email, reason, requested_at, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(request.id)
        .bind(request.admin_id)
        .bind(&request.admin_email)
        .bind(request.target_user_id)
        .bind(&request.target_email)
        .bind(&request.reason)
        .bind(request.requested_at)
        .bind(request.status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(classify)
    }

    async fn update_request_status(
        &self,
        id: Uuid,
        expected: RequestStatus,
        update: StatusUpdate,
        audit: &AuditEntry,
    ) -> Result<Transition<RequestStatus>, StoreError> {
        let mut tx = self.begin().await?;

        if !Self::swap_status(&mut tx, id, expected, update).await? {
            return Self::current_status(&mut tx, id).await;
        }

        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(classify)?;
        Ok(Transition::Applied)
    }

    async fn pending_request_for_target(&self, target_user_id: Uuid) -> Result<Option<ElevationRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM elevation_requests WHERE target_user_id = $1 AND status = 'pending'",
            REQUEST_COLUMNS
        );
        Ok(self.fetch_requests(&sql, target_user_id).await?.into_iter().next())
    }

    async fn pending_requests_by_admin(&self, admin_id: Uuid) -> Result<Vec<ElevationRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM elevation_requests WHERE admin_id = $1 AND status = 'pending' ORDER BY requested_at",
            REQUEST_COLUMNS
        );
        self.fetch_requests(&sql, admin_id).await
    }

    async fn pending_requests_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ElevationRequest>, StoreError> {
        let sql = format!(
            "SELECT {} FROM elevation_requests WHERE status = 'pending' AND requested_at < $1 ORDER BY requested_at",
            REQUEST_COLUMNS
        );
        self.fetch_requests(&sql, cutoff).await
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn get_session(&self, id: Uuid) -> Result<Option<ElevationSession>, StoreError> {
        let sql = format!("SELECT {} FROM elevation_sessions WHERE id = $1", SESSION_COLUMNS);
        Ok(self.fetch_sessions(&sql, id).await?.into_iter().next())
    }

    async fn end_session(
        &self,
        id: Uuid,
        end: SessionEnd,
        audit: &AuditEntry,
    ) -> Result<Transition<EndReason>, StoreError> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            "UPDATE elevation_sessions
             SET ended_at = $2, end_reason = $3, ended_by = $4
             WHERE id = $1 AND ended_at IS NULL",
        )
        .bind(id)
        .bind(end.ended_at)
        .bind(end.reason.as_str())
        .bind(end.ended_by.to_string())
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            let existing: Option<Option<String>> =
                sqlx::query_scalar("SELECT end_reason FROM elevation_sessions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(classify)?;
            return match existing {
                None => Ok(Transition::Missing),
                Some(reason) => {
                    let reason = reason
                        .map(|r| r.parse())
                        .transpose()
                        .map_err(corrupt)?
                        .unwrap_or(EndReason::EndedBySystem);
                    Ok(Transition::Stale(reason))
                }
            };
        }

        Self::insert_audit(&mut tx, audit).await?;
        tx.commit().await.map_err(classify)?;
        Ok(Transition::Applied)
    }

    async fn open_session_for_target(&self, target_user_id: Uuid) -> Result<Option<ElevationSession>, StoreError> {
        let sql = format!(
            "SELECT {} FROM elevation_sessions WHERE target_user_id = $1 AND ended_at IS NULL",
            SESSION_COLUMNS
        );
        Ok(self.fetch_sessions(&sql, target_user_id).await?.into_iter().next())
    }

    async fn open_sessions_for_admin(&self, admin_id: Uuid) -> Result<Vec<ElevationSession>, StoreError> {
        let sql = format!(
            "SELECT {} FROM elevation_sessions WHERE admin_id = $1 AND ended_at IS NULL ORDER BY started_at DESC",
            SESSION_COLUMNS
        );
        self.fetch_sessions(&sql, admin_id).await
    }

    async fn open_sessions_expiring_by(&self, cutoff: DateTime<Utc>) -> Result<Vec<ElevationSession>, StoreError> {
        let sql = format!(
            "SELECT {} FROM elevation_sessions WHERE ended_at IS NULL AND expires_at <= $1 ORDER BY expires_at",
            SESSION_COLUMNS
        );
        self.fetch_sessions(&sql, cutoff).await
    }
}

#[async_trait]
impl AuditLog for PgStore {
    async fn entries_for(&self, subject_type: SubjectType, subject_id: Uuid) -> Result<Vec<AuditEntry>, StoreError> {
        let sql = format!(
            "SELECT {} FROM elevation_audit WHERE subject_type = $1 AND subject_id = $2 ORDER BY at, seq",
            AUDIT_COLUMNS
        );
        let rows: Vec<AuditRow> = sqlx::query_as(&sql)
            .bind(subject_type.as_str())
            .bind(subject_id)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let sql = format!("SELECT {} FROM elevation_audit ORDER BY seq DESC LIMIT $1", AUDIT_COLUMNS);
        let rows: Vec<AuditRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

#[async_trait]
impl ElevationStore for PgStore {
    async fn approve_request(
        &self,
        request_id: Uuid,
        update: StatusUpdate,
        session: &ElevationSession,
        audit: &[AuditEntry],
    ) -> Result<Transition<RequestStatus>, StoreError> {
        let mut tx = self.begin().await?;

        if !Self::swap_status(&mut tx, request_id, RequestStatus::Pending, update).await? {
            return Self::current_status(&mut tx, request_id).await;
        }

        sqlx::query(
            "INSERT INTO elevation_sessions
             (id, request_id, admin_id, admin_email, target_user_id, target_email, started_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id)
        .bind(session.request_id)
        .bind(session.admin_id)
        .bind(&session.admin_email)
        .bind(session.target_user_id)
        .bind(&session.target_email)
        .bind(session.started_at)
        .bind(session.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;

        for entry in audit {
            Self::insert_audit(&mut tx, entry).await?;
        }
        tx.commit().await.map_err(classify)?;
        Ok(Transition::Applied)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(classify)?;
        Ok(())
    }
}
