// Credvault: Access log models

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessOutcome {
    Success,
    Denied,
    Error,
}

impl AccessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOutcome::Success => "SUCCESS",
            AccessOutcome::Denied => "DENIED",
            AccessOutcome::Error => "ERROR",
        }
    }
}

impl fmt::Display for AccessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(AccessOutcome::Success),
            "DENIED" => Ok(AccessOutcome::Denied),
            "ERROR" => Ok(AccessOutcome::Error),
            other => Err(format!("unknown access outcome '{}'", other)),
        }
    }
}

/// One access attempt. `credential_id` is a weak reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialAccessLog {
    pub id: Uuid,
    pub credential_id: Uuid,
    pub accessor_id: String,
    /// When the attempt started, not when the entry was written.
    pub accessed_at: NaiveDateTime,
    pub outcome: AccessOutcome,
    pub reason: String,
}

impl fmt::Display for CredentialAccessLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} credential={} accessor={} reason={}",
            self.accessed_at.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.outcome,
            self.credential_id,
            self.accessor_id,
            self.reason
        )
    }
}

/// Access log query. Time range is `from` inclusive, `to` exclusive.
#[derive(Debug, Clone, Default)]
pub struct AccessLogFilter {
    pub credential_id: Option<Uuid>,
    pub accessor_id: Option<String>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    pub outcome: Option<AccessOutcome>,
}

impl AccessLogFilter {
    pub fn for_credential(credential_id: Uuid) -> Self {
        Self {
            credential_id: Some(credential_id),
            ..Self::default()
        }
    }

    pub fn by_accessor(accessor_id: impl Into<String>) -> Self {
        Self {
            accessor_id: Some(accessor_id.into()),
            ..Self::default()
        }
    }
}

/// Position in an access log walk: the last entry's timestamp and its
/// insertion sequence, which breaks timestamp ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogCursor {
    pub accessed_at: NaiveDateTime,
    pub seq: i64,
}

impl AccessLogCursor {
    /// Opaque text form suitable for handing back to a caller.
    pub fn encode(&self) -> Result<String, AuditError> {
        serde_json::to_string(self).map_err(|e| AuditError::InvalidCursor(e.to_string()))
    }

    pub fn decode(token: &str) -> Result<Self, AuditError> {
        serde_json::from_str(token).map_err(|e| AuditError::InvalidCursor(e.to_string()))
    }
}
