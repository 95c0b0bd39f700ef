// Credvault: Master Key Provider
//
// Manages the master secret that roots every other key in the vault.
// The master secret is stored in the platform's native keyring and never
// exposed in logs, debug output, or process memory longer than necessary.
//
// Flow:
//   1. `get_or_create_master_secret()` retrieves from keyring, or generates + stores a new one
//   2. `derive_db_key()` derives the 32-byte SQLCipher key with Argon2id
//   3. `KeyRing` derives one key-encryption key per key version the same way

use std::sync::Mutex;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::EnclaveError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default service name used to identify Credvault entries in the platform keyring.
pub const DEFAULT_KEYRING_SERVICE: &str = "credvault";

/// Username for the keyring entry (identifies the master secret).
const KEYRING_USER: &str = "master-secret";

/// Length of the randomly generated master secret in bytes (256-bit entropy).
const MASTER_SECRET_LEN: usize = 32;

/// Length of every derived key in bytes (256-bit for AES-256).
pub(crate) const DERIVED_KEY_LEN: usize = 32;

/// Domain label for the database key salt.
const DB_KEY_LABEL: &[u8] = b"credvault::database";

// ─── KDF parameters ──────────────────────────────────────────────────────────

/// Argon2id cost parameters.
///
/// The defaults (m=65536 KiB, t=3, p=4) are strong settings for a security
/// application. Tests and constrained hosts may lower them via configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl KdfParams {
    fn argon2(&self) -> Result<Argon2<'static>, EnclaveError> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(DERIVED_KEY_LEN))
            .map_err(|e| EnclaveError::Derivation(format!("invalid Argon2 params: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Derive a 32-byte key from the master secret, salted with SHA-256(label).
pub(crate) fn derive_key(
    master_secret: &[u8],
    label: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, EnclaveError> {
    let salt = Sha256::digest(label);
    let mut derived = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    params
        .argon2()?
        .hash_password_into(master_secret, &salt, &mut derived[..])
        .map_err(|e| EnclaveError::Derivation(format!("Argon2id hash failed: {}", e)))?;
    Ok(derived)
}

/// Derive the SQLCipher database key from the master secret.
pub fn derive_db_key(
    master_secret: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; DERIVED_KEY_LEN]>, EnclaveError> {
    derive_key(master_secret, DB_KEY_LABEL, params)
}

fn generate_master_secret() -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
    let mut secret = Zeroizing::new(vec![0u8; MASTER_SECRET_LEN]);
    rand::rng().fill_bytes(&mut secret);

    if secret.len() != MASTER_SECRET_LEN {
        return Err(EnclaveError::InsufficientEntropy(
            secret.len(),
            MASTER_SECRET_LEN,
        ));
    }

    Ok(secret)
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Source of the master secret. Injected at construction so the rest of
/// the vault never touches ambient key state.
pub trait MasterKeyProvider: Send + Sync {
    /// Retrieve the master secret, generating and storing one on first run.
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError>;

    /// Check if a master secret already exists.
    fn has_master_secret(&self) -> Result<bool, EnclaveError>;
}

// ─── Platform Implementation ─────────────────────────────────────────────────

/// Production implementation using the `keyring` crate.
/// Dispatches to:
///   - Linux: kernel keyutils
///   - macOS: Security.framework Keychain
///   - Windows: Windows Credential Manager
pub struct KeyringProvider {
    service: String,
    user: String,
}

impl KeyringProvider {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            user: KEYRING_USER.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, EnclaveError> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| EnclaveError::Keyring(format!("failed to create keyring entry: {}", e)))
    }
}

impl Default for KeyringProvider {
    fn default() -> Self {
        Self::new(DEFAULT_KEYRING_SERVICE)
    }
}

impl MasterKeyProvider for KeyringProvider {
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let entry = self.entry()?;

        match entry.get_secret() {
            Ok(secret) => {
                tracing::debug!("Retrieved existing master secret from keyring");
                Ok(Zeroizing::new(secret))
            }
            Err(keyring::Error::NoEntry) => {
                tracing::info!("No master secret found, generating a new one");
                let secret = generate_master_secret()?;
                entry.set_secret(&secret).map_err(|e| {
                    EnclaveError::Keyring(format!("failed to store master secret: {}", e))
                })?;
                tracing::info!(service = %self.service, "Master secret stored in platform keyring");
                Ok(secret)
            }
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to retrieve master secret: {}",
                e
            ))),
        }
    }

    fn has_master_secret(&self) -> Result<bool, EnclaveError> {
        let entry = self.entry()?;
        match entry.get_secret() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(EnclaveError::Keyring(format!(
                "failed to check master secret: {}",
                e
            ))),
        }
    }
}

// ─── In-Memory Implementation ────────────────────────────────────────────────

/// Holds the master secret in process memory. For embedding the vault in
/// another process that manages its own root of trust, and for tests.
pub struct StaticMasterKey {
    secret: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl StaticMasterKey {
    /// Empty provider; a random secret is generated on first use.
    pub fn new() -> Self {
        Self {
            secret: Mutex::new(None),
        }
    }

    /// Provider pre-loaded with a known secret.
    pub fn with_secret(secret: Vec<u8>) -> Self {
        Self {
            secret: Mutex::new(Some(Zeroizing::new(secret))),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Zeroizing<Vec<u8>>>> {
        self.secret
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for StaticMasterKey {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterKeyProvider for StaticMasterKey {
    fn get_or_create_master_secret(&self) -> Result<Zeroizing<Vec<u8>>, EnclaveError> {
        let mut slot = self.slot();
        if let Some(secret) = slot.as_ref() {
            return Ok(secret.clone());
        }
        let secret = generate_master_secret()?;
        *slot = Some(secret.clone());
        Ok(secret)
    }

    fn has_master_secret(&self) -> Result<bool, EnclaveError> {
        Ok(self.slot().is_some())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn light() -> KdfParams {
        KdfParams {
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn test_master_secret_generation_has_correct_entropy() {
        let provider = StaticMasterKey::new();
        let secret = provider.get_or_create_master_secret().unwrap();
        assert_eq!(
            secret.len(),
            MASTER_SECRET_LEN,
            "Master secret must be exactly {} bytes (256-bit entropy)",
            MASTER_SECRET_LEN
        );
    }

    #[test]
    fn test_master_secret_is_stable_once_created() {
        let provider = StaticMasterKey::new();
        let first = provider.get_or_create_master_secret().unwrap();
        let second = provider.get_or_create_master_secret().unwrap();
        assert_eq!(
            first.as_slice(),
            second.as_slice(),
            "Subsequent calls must return the same master secret"
        );
    }

    #[test]
    fn test_db_key_derivation_deterministic() {
        let master = vec![42u8; MASTER_SECRET_LEN];
        let key1 = derive_db_key(&master, &light()).unwrap();
        let key2 = derive_db_key(&master, &light()).unwrap();
        assert_eq!(key1.as_slice(), key2.as_slice());
        assert_eq!(key1.len(), DERIVED_KEY_LEN);
    }

    #[test]
    fn test_different_secrets_produce_different_keys() {
        let key_a = derive_db_key(&[1u8; MASTER_SECRET_LEN], &light()).unwrap();
        let key_b = derive_db_key(&[2u8; MASTER_SECRET_LEN], &light()).unwrap();
        assert_ne!(key_a.as_slice(), key_b.as_slice());
    }

    #[test]
    fn test_labels_separate_key_domains() {
        let master = [7u8; MASTER_SECRET_LEN];
        let db = derive_db_key(&master, &light()).unwrap();
        let other = derive_key(&master, b"credvault::kek::1", &light()).unwrap();
        assert_ne!(db.as_slice(), other.as_slice());
    }

    #[test]
    fn test_invalid_kdf_params_rejected() {
        let params = KdfParams {
            m_cost: 1,
            t_cost: 1,
            p_cost: 1,
        };
        let err = derive_db_key(&[0u8; MASTER_SECRET_LEN], &params).unwrap_err();
        assert!(matches!(err, EnclaveError::Derivation(_)));
    }

    #[test]
    fn test_has_master_secret_after_create() {
        let provider = StaticMasterKey::new();
        assert!(!provider.has_master_secret().unwrap());

        provider.get_or_create_master_secret().unwrap();
        assert!(provider.has_master_secret().unwrap());
    }
}
