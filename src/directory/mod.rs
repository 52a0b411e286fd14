//! Account lookups consumed from the authentication service: resolving an
//! email to an account, and whether an account holds operator capability.

pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::store::StoreError;

pub use postgres::PgDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Operator,
    Member,
}

impl AccountRole {
    /// Map the auth service's role column. Anything unrecognised is a plain member.
    pub fn from_db(role: &str) -> Self {
        match role {
            "admin" | "operator" | "root" => AccountRole::Operator,
            _ => AccountRole::Member,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub role: AccountRole,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Case-insensitive email lookup over active accounts.
    async fn resolve_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn has_operator_capability(&self, account_id: Uuid) -> Result<bool, StoreError>;
}

/// Fixed account list held in memory (tests and the memory backend).
#[derive(Default)]
pub struct StaticDirectory {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: Account) {
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(account.id, account);
    }

    /// Register an account and return its id.
    pub fn add(&self, email: &str, role: AccountRole) -> Uuid {
        let id = Uuid::new_v4();
        self.insert(Account { id, email: email.to_string(), role });
        id
    }

    /// Parse `id:email:role` entries separated by commas, e.g. the
    /// `MEMORY_ACCOUNTS` environment variable.
    pub fn from_seed(seed: &str) -> Result<Self, String> {
        let directory = Self::new();
        for entry in seed.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.splitn(3, ':').collect();
            let [id, email, role] = parts.as_slice() else {
                return Err(format!("account seed '{}' must look like id:email:role", entry));
            };
            let id = Uuid::parse_str(id).map_err(|e| format!("account seed '{}': {}", entry, e))?;
            directory.insert(Account { id, email: email.to_string(), role: AccountRole::from_db(role) });
        }
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.accounts.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn resolve_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let needle = email.trim().to_lowercase();
        Ok(self
            .accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|a| a.email.to_lowercase() == needle)
            .cloned())
    }

    async fn has_operator_capability(&self, account_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&account_id)
            .map(|a| a.role == AccountRole::Operator)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_emails_case_insensitively() {
        let directory = StaticDirectory::new();
        let id = directory.add("Jane@Example.com", AccountRole::Member);
        let found = directory.resolve_email(" jane@example.COM ").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(directory.resolve_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_operators_hold_capability() {
        let directory = StaticDirectory::new();
        let ops = directory.add("ops@example.com", AccountRole::Operator);
        let member = directory.add("user@example.com", AccountRole::Member);
        assert!(directory.has_operator_capability(ops).await.unwrap());
        assert!(!directory.has_operator_capability(member).await.unwrap());
        assert!(!directory.has_operator_capability(Uuid::new_v4()).await.unwrap());
    }

    #[test]
    fn parses_seed_entries() {
        let id = Uuid::new_v4();
        let directory = StaticDirectory::from_seed(&format!("{}:ops@example.com:admin, ", id)).unwrap();
        assert_eq!(directory.len(), 1);
        assert!(StaticDirectory::from_seed("not-a-uuid:x@example.com:admin").is_err());
        assert!(StaticDirectory::from_seed("missing-parts").is_err());
    }
}
