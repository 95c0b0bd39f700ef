// Credvault: Store error types

use thiserror::Error;

use crate::enclave::EnclaveError;
use crate::lifecycle::CredentialState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{0} not found")]
    NotFound(String),

    /// Optimistic-lock collision. Retry with a fresh read.
    #[error("Version conflict on {entity} {id}: expected version {expected}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
    },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: CredentialState,
        to: CredentialState,
    },

    #[error("Credential type code '{0}' already exists")]
    DuplicateCode(String),

    #[error("Credential type code '{0}' is referenced by credentials and cannot change")]
    ImmutableCode(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Sealing error: {0}")]
    Enclave(#[from] EnclaveError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database not initialized, run `credvault init` first")]
    NotInitialized,

    #[error("Invalid database key, database may be corrupted or key is wrong")]
    InvalidKey,

    #[error("Database lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
