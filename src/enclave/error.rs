// Credvault: Enclave error types

use thiserror::Error;

use super::KeyVersion;

#[derive(Debug, Error)]
pub enum EnclaveError {
    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Key derivation error: {0}")]
    Derivation(String),

    #[error("Master secret not found, run `credvault init` first")]
    MasterSecretNotFound,

    #[error("Entropy error: generated secret has insufficient entropy ({0} bytes, expected {1})")]
    InsufficientEntropy(usize, usize),

    #[error("Key version {0} is unavailable")]
    KeyUnavailable(KeyVersion),

    #[error("Encryption failure: {0}")]
    EncryptionFailure(String),

    /// Authentication tag mismatch. Treated as a security incident.
    #[error("Integrity violation: sealed secret failed authentication")]
    IntegrityViolation,

    #[error("Key rotation conflict: {0}")]
    RotationConflict(String),
}
