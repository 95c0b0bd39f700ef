// Credvault: Audit error types

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuditError {
    /// The access-log entry could not be persisted.
    #[error("Audit write failed: {0}")]
    WriteFailure(#[source] StoreError),

    #[error("Audit store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid audit cursor: {0}")]
    InvalidCursor(String),
}
