/// Shared types used across the broker, the stores and the HTTP layer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of an elevation request. Terminal once non-Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

/// Why an elevated session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Expired,
    EndedByAdmin,
    EndedByUser,
    EndedBySystem,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Expired => "expired",
            EndReason::EndedByAdmin => "ended_by_admin",
            EndReason::EndedByUser => "ended_by_user",
            EndReason::EndedBySystem => "ended_by_system",
        }
    }
}

/// A target user's answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Request,
    Session,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Request => "request",
            SubjectType::Session => "session",
        }
    }
}

/// Every lifecycle transition that lands in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTransition {
    RequestCreated,
    RequestApproved,
    RequestRejected,
    RequestExpired,
    SessionStarted,
    SessionEnded,
}

impl AuditTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditTransition::RequestCreated => "request_created",
            AuditTransition::RequestApproved => "request_approved",
            AuditTransition::RequestRejected => "request_rejected",
            AuditTransition::RequestExpired => "request_expired",
            AuditTransition::SessionStarted => "session_started",
            AuditTransition::SessionEnded => "session_ended",
        }
    }

    pub fn subject_type(&self) -> SubjectType {
        match self {
            AuditTransition::RequestCreated
            | AuditTransition::RequestApproved
            | AuditTransition::RequestRejected
            | AuditTransition::RequestExpired => SubjectType::Request,
            AuditTransition::SessionStarted | AuditTransition::SessionEnded => SubjectType::Session,
        }
    }
}

/// Who caused a transition: a signed-in account, or the broker itself
/// (timers, the reaper, forced closes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actor {
    Account(Uuid),
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Account(id) => write!(f, "account:{}", id),
            Actor::System => write!(f, "system"),
        }
    }
}

/// Error for the string round-trips used by the Postgres store.
#[derive(Debug, thiserror::Error)]
#[error("unrecognised {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

impl FromStr for Actor {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "system" {
            return Ok(Actor::System);
        }
        s.strip_prefix("account:")
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(Actor::Account)
            .ok_or_else(|| ParseEnumError::new("actor", s))
    }
}

impl FromStr for RequestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "expired" => Ok(RequestStatus::Expired),
            other => Err(ParseEnumError::new("request status", other)),
        }
    }
}

impl FromStr for EndReason {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expired" => Ok(EndReason::Expired),
            "ended_by_admin" => Ok(EndReason::EndedByAdmin),
            "ended_by_user" => Ok(EndReason::EndedByUser),
            "ended_by_system" => Ok(EndReason::EndedBySystem),
            other => Err(ParseEnumError::new("end reason", other)),
        }
    }
}

impl FromStr for SubjectType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(SubjectType::Request),
            "session" => Ok(SubjectType::Session),
            other => Err(ParseEnumError::new("subject type", other)),
        }
    }
}

impl FromStr for AuditTransition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request_created" => Ok(AuditTransition::RequestCreated),
            "request_approved" => Ok(AuditTransition::RequestApproved),
            "request_rejected" => Ok(AuditTransition::RequestRejected),
            "request_expired" => Ok(AuditTransition::RequestExpired),
            "session_started" => Ok(AuditTransition::SessionStarted),
            "session_ended" => Ok(AuditTransition::SessionEnded),
            other => Err(ParseEnumError::new("audit transition", other)),
        }
    }
}

impl Serialize for Actor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Actor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
