use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{Account, AccountDirectory, AccountRole};
use crate::store::postgres::classify;
use crate::store::StoreError;

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    role: String,
}

/// Reads the auth service's `users` table. Soft-deleted users do not resolve.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountDirectory for PgDirectory {
    async fn resolve_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, role
             FROM users
             WHERE lower(email) = lower($1)
             AND deleted_at IS NULL",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(row.map(|row| Account {
            id: row.id,
            email: row.email,
            role: AccountRole::from_db(&row.role),
        }))
    }

    async fn has_operator_capability(&self, account_id: Uuid) -> Result<bool, StoreError> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(role.map(|r| AccountRole::from_db(&r) == AccountRole::Operator).unwrap_or(false))
    }
}
