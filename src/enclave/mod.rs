// Credvault: Enclave Module
//
// Owns all key material. The master secret lives in the platform keyring;
// per-version key-encryption keys are derived from it with Argon2id and
// used to wrap the random data keys that seal each credential secret.

mod error;
mod keys;
mod provider;
mod sealer;

pub use error::EnclaveError;
pub use keys::{
    KeyManager, KeyMaterial, KeyPlan, KeyRing, KeyStatus, KeyVersion, KeyVersionInfo,
};
pub use provider::{
    derive_db_key, KdfParams, KeyringProvider, MasterKeyProvider, StaticMasterKey,
    DEFAULT_KEYRING_SERVICE,
};
pub use sealer::{CryptoSealer, SealedSecret, SecretBytes};

#[cfg(test)]
pub(crate) use keys::testing;
