// Credvault: Credential data models
//
// SECURITY: `Credential` only ever holds the sealed form of its secret.
// Plaintext exists transiently in `NewCredential` (zeroized on drop) and in
// the value returned by an audited access.

use std::fmt;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enclave::{KeyVersion, SealedSecret, SecretBytes};
use crate::lifecycle::CredentialState;

use super::StoreError;

pub const CODE_MIN_LEN: usize = 2;
pub const CODE_MAX_LEN: usize = 50;
pub const NAME_MIN_LEN: usize = 2;
pub const NAME_MAX_LEN: usize = 100;

// ─── Credential types ────────────────────────────────────────────────────────

/// Reference entity describing an allowed kind of credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub active: bool,
    /// Optimistic-lock version, starts at 0.
    pub version: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.name)?;
        if !self.active {
            f.write_str(" [inactive]")?;
        }
        Ok(())
    }
}

/// Input for `CredentialTypeRegistry::upsert`.
///
/// Without an `id` the draft is inserted; with an `id` it updates that type
/// and `version` must carry the version the caller last read.
#[derive(Debug, Clone)]
pub struct CredentialTypeDraft {
    pub id: Option<Uuid>,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub active: bool,
    pub version: Option<u64>,
}

impl CredentialTypeDraft {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
            name: name.into(),
            description: None,
            category: None,
            active: true,
            version: None,
        }
    }

    /// Draft that updates `existing`, carrying its id and version.
    pub fn from_existing(existing: &CredentialType) -> Self {
        Self {
            id: Some(existing.id),
            code: existing.code.clone(),
            name: existing.name.clone(),
            description: existing.description.clone(),
            category: existing.category.clone(),
            active: existing.active,
            version: Some(existing.version),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Check the field contract: code 2-50 chars, name 2-100 chars, both non-blank.
    pub fn validate(&self) -> Result<(), StoreError> {
        check_text("code", &self.code, CODE_MIN_LEN, CODE_MAX_LEN)?;
        check_text("name", &self.name, NAME_MIN_LEN, NAME_MAX_LEN)
    }
}

fn check_text(field: &str, value: &str, min: usize, max: usize) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation(format!("{} is required", field)));
    }
    let len = value.chars().count();
    if len < min || len > max {
        return Err(StoreError::Validation(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

// ─── Credentials ─────────────────────────────────────────────────────────────

/// A stored credential. The secret is sealed; `None` once purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: Uuid,
    pub type_id: Uuid,
    pub owner_id: String,
    pub sealed: Option<SealedSecret>,
    pub state: CredentialState,
    /// Optimistic-lock version, starts at 0.
    pub version: u64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    /// Set when soft-deleted. Tombstoned records are invisible to `get`.
    pub deleted_at: Option<NaiveDateTime>,
}

impl Credential {
    pub fn key_version(&self) -> Option<KeyVersion> {
        self.sealed.as_ref().map(|s| s.key_version)
    }

    /// Lazy expiry check: true once `now >= expires_at`.
    pub fn is_past_expiry(&self, now: NaiveDateTime) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] owner={} state={}", self.id, self.owner_id, self.state)?;
        if let Some(at) = self.expires_at {
            write!(f, " expires={}", at.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}

/// Input struct for creating a new credential.
pub struct NewCredential {
    pub owner_id: String,
    pub type_code: String,
    pub secret: SecretBytes,
    /// Time to live from creation; `None` never expires.
    pub ttl: Option<Duration>,
    /// Start in PENDING and require confirmation instead of starting ACTIVE.
    pub require_confirmation: bool,
}

impl NewCredential {
    pub fn new(owner_id: impl Into<String>, type_code: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            owner_id: owner_id.into(),
            type_code: type_code.into(),
            secret: SecretBytes::new(secret.to_vec()),
            ttl: None,
            require_confirmation: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn pending(mut self) -> Self {
        self.require_confirmation = true;
        self
    }
}

/// How `CredentialStore::delete` removes a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Remove the row.
    Hard,
    /// Keep the row as a purged, DESTROYED tombstone.
    #[default]
    Tombstone,
}

/// Filter for credential listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CredentialFilter {
    pub owner_id: Option<String>,
    pub states: Vec<CredentialState>,
    pub key_version: Option<KeyVersion>,
    pub include_deleted: bool,
}

impl CredentialFilter {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    /// Live credentials whose secret is sealed under `version`.
    pub fn sealed_with(version: KeyVersion) -> Self {
        Self {
            key_version: Some(version),
            ..Self::default()
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;

    #[test]
    fn test_draft_accepts_valid_fields() {
        assert!(CredentialTypeDraft::new("API_KEY", "API Key").validate().is_ok());
    }

    #[test]
    fn test_draft_rejects_blank_code() {
        let err = CredentialTypeDraft::new("   ", "API Key").validate().unwrap_err();
        assert!(matches!(err, StoreError::Validation(msg) if msg.contains("code")));
    }

    #[test]
    fn test_draft_enforces_length_bounds() {
        assert!(CredentialTypeDraft::new("A", "API Key").validate().is_err());
        assert!(CredentialTypeDraft::new("A".repeat(51), "API Key").validate().is_err());
        assert!(CredentialTypeDraft::new("A".repeat(50), "API Key").validate().is_ok());
        assert!(CredentialTypeDraft::new("API_KEY", "N").validate().is_err());
        assert!(CredentialTypeDraft::new("API_KEY", "N".repeat(101)).validate().is_err());
        assert!(CredentialTypeDraft::new("API_KEY", "N".repeat(100)).validate().is_ok());
    }

    #[test]
    fn test_lengths_count_characters_not_bytes() {
        // 25 two-byte characters: 50 bytes but 25 chars
        let code = "é".repeat(25);
        assert!(CredentialTypeDraft::new(code, "Accented").validate().is_ok());
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let now = clock::now();
        let cred = Credential {
            id: Uuid::new_v4(),
            type_id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            sealed: None,
            state: CredentialState::Active,
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at: Some(now),
            deleted_at: None,
        };
        assert!(cred.is_past_expiry(now));
        assert!(!cred.is_past_expiry(now - Duration::seconds(1)));
    }

    #[test]
    fn test_credential_display_has_no_secret_material() {
        let now = clock::now();
        let cred = Credential {
            id: Uuid::new_v4(),
            type_id: Uuid::new_v4(),
            owner_id: "ci-bot".to_string(),
            sealed: None,
            state: CredentialState::Revoked,
            version: 3,
            created_at: now,
            updated_at: now,
            expires_at: None,
            deleted_at: None,
        };
        let shown = cred.to_string();
        assert!(shown.contains("ci-bot"));
        assert!(shown.contains("REVOKED"));
    }

    #[test]
    fn test_delete_mode_defaults_to_tombstone() {
        assert_eq!(DeleteMode::default(), DeleteMode::Tombstone);
    }
}
