// Credvault: Top-level error types
//
// Aggregates errors from the enclave, store and audit modules into a
// single error enum for the application boundary.

use thiserror::Error;

use crate::enclave::EnclaveError;
use crate::store::StoreError;

/// Top-level error type for all Credvault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Enclave error: {0}")]
    Enclave(#[from] EnclaveError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] crate::audit::AuditError),

    /// Uniform denial. The concrete reason is only kept in the access log.
    #[error("Access denied")]
    AccessDenied,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl VaultError {
    /// Reason code recorded in the access log when an access fails with this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            VaultError::Enclave(EnclaveError::IntegrityViolation) => "INTEGRITY_VIOLATION",
            VaultError::Enclave(EnclaveError::KeyUnavailable(_)) => "KEY_UNAVAILABLE",
            VaultError::Enclave(_) => "ENCLAVE_ERROR",
            VaultError::Store(StoreError::Enclave(EnclaveError::IntegrityViolation)) => {
                "INTEGRITY_VIOLATION"
            }
            VaultError::Store(_) => "STORE_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, VaultError::Store(e) if e.is_version_conflict())
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
