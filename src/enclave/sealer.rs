// Credvault: Crypto Sealer
//
// Envelope encryption of credential secrets. Each seal draws a fresh
// 256-bit data key, encrypts the plaintext with it (AES-256-GCM), and wraps
// the data key with the key-encryption key of the requested version. The
// key version is bound into both ciphertexts as associated data.
//
// SECURITY: plaintext only ever leaves this module inside `SecretBytes`,
// which zeroizes on drop. Nothing here logs or formats secret material.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::keys::{KeyManager, KeyVersion};
use super::provider::DERIVED_KEY_LEN;
use super::EnclaveError;

/// AES-GCM nonce length in bytes (96-bit).
pub const NONCE_LEN: usize = 12;

/// Associated-data prefix; the key version is appended big-endian.
const AAD_PREFIX: &[u8] = b"credvault.sealed.v1:";

/// Unsealed plaintext. Zeroized when dropped.
pub type SecretBytes = Zeroizing<Vec<u8>>;

/// A sealed secret as persisted. Holds no plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedSecret {
    /// Key-encryption key version that wrapped `wrapped_key`.
    pub key_version: KeyVersion,
    /// The data key, encrypted under the key-encryption key (includes tag).
    pub wrapped_key: Vec<u8>,
    pub key_nonce: Vec<u8>,
    pub nonce: Vec<u8>,
    /// The secret, encrypted under the data key (includes tag).
    pub ciphertext: Vec<u8>,
}

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedSecret")
            .field("key_version", &self.key_version)
            .field("ciphertext", &format_args!("[{} bytes]", self.ciphertext.len()))
            .finish_non_exhaustive()
    }
}

/// Seals and unseals secrets against an injected key manager.
pub struct CryptoSealer {
    keys: Arc<dyn KeyManager>,
}

impl CryptoSealer {
    pub fn new(keys: Arc<dyn KeyManager>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &Arc<dyn KeyManager> {
        &self.keys
    }

    /// Seal with the current key version.
    pub fn seal_current(&self, plaintext: &[u8]) -> Result<SealedSecret, EnclaveError> {
        self.seal(plaintext, self.keys.current_version())
    }

    /// Seal `plaintext` under `key_version`.
    pub fn seal(
        &self,
        plaintext: &[u8],
        key_version: KeyVersion,
    ) -> Result<SealedSecret, EnclaveError> {
        let kek = self.keys.get_key(key_version)?;
        let aad = associated_data(key_version);

        let mut data_key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        rand::rng().fill_bytes(&mut data_key[..]);
        let key_nonce = random_nonce();
        let nonce = random_nonce();

        let wrapped_key = encrypt(kek.as_bytes(), &key_nonce, &data_key[..], &aad)?;
        let ciphertext = encrypt(&data_key[..], &nonce, plaintext, &aad)?;

        Ok(SealedSecret {
            key_version,
            wrapped_key,
            key_nonce: key_nonce.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    /// Recover the plaintext of `sealed`.
    pub fn unseal(&self, sealed: &SealedSecret) -> Result<SecretBytes, EnclaveError> {
        if sealed.key_nonce.len() != NONCE_LEN || sealed.nonce.len() != NONCE_LEN {
            return Err(EnclaveError::IntegrityViolation);
        }

        let kek = self.keys.get_key(sealed.key_version)?;
        let aad = associated_data(sealed.key_version);

        let data_key = decrypt(kek.as_bytes(), &sealed.key_nonce, &sealed.wrapped_key, &aad)?;
        if data_key.len() != DERIVED_KEY_LEN {
            return Err(EnclaveError::IntegrityViolation);
        }

        decrypt(&data_key, &sealed.nonce, &sealed.ciphertext, &aad)
    }
}

fn associated_data(key_version: KeyVersion) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_PREFIX.len() + 4);
    aad.extend_from_slice(AAD_PREFIX);
    aad.extend_from_slice(&key_version.to_be_bytes());
    aad
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);
    nonce
}

fn encrypt(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>, EnclaveError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| EnclaveError::EncryptionFailure("invalid key length".to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| EnclaveError::EncryptionFailure("AES-GCM encryption failed".to_string()))
}

fn decrypt(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<SecretBytes, EnclaveError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EnclaveError::IntegrityViolation)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg, aad })
        .map(Zeroizing::new)
        .map_err(|_| EnclaveError::IntegrityViolation)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
