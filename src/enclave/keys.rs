// Credvault: Key Ring
//
// Versioned key-encryption keys. Exactly one version is current and used
// for sealing; older versions stay readable for unsealing until retired.
// Rotation and retirement take the write lock only long enough to update
// the version table, so unseals running concurrently keep their keys.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::provider::{derive_key, KdfParams, DERIVED_KEY_LEN};
use super::EnclaveError;
use crate::clock::now;

pub type KeyVersion = u32;

/// Version assigned to the first key of a fresh ring.
const INITIAL_VERSION: KeyVersion = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Retired,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(KeyStatus::Active),
            "retired" => Some(KeyStatus::Retired),
            _ => None,
        }
    }
}

/// Metadata for one key version. Never contains key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionInfo {
    pub version: KeyVersion,
    pub status: KeyStatus,
    pub created_at: NaiveDateTime,
    pub retired_at: Option<NaiveDateTime>,
}

/// A 256-bit key-encryption key. Zeroized on drop, redacted in Debug.
pub struct KeyMaterial(Zeroizing<[u8; DERIVED_KEY_LEN]>);

impl KeyMaterial {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial([REDACTED])")
    }
}

/// A proposed change to the version table, not yet in effect.
///
/// Callers persist `versions` first and then `apply` the plan, so the
/// ring never runs ahead of its durable record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPlan {
    /// The version being added or retired, as it will stand.
    pub changed: KeyVersionInfo,
    /// The full version table after the change, ascending.
    pub versions: Vec<KeyVersionInfo>,
    generation: u64,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Key management collaborator used by the sealer and the lifecycle manager.
pub trait KeyManager: Send + Sync {
    /// Key material for `version`, or `KeyUnavailable` if unknown or retired.
    fn get_key(&self, version: KeyVersion) -> Result<Arc<KeyMaterial>, EnclaveError>;

    /// The version new seals must use.
    fn current_version(&self) -> KeyVersion;

    /// Plan a new version that becomes current once applied.
    fn plan_rotation(&self) -> Result<KeyPlan, EnclaveError>;

    /// Plan the retirement of `version`. Retiring the current version is a
    /// `RotationConflict`, an unknown one is `KeyUnavailable`.
    fn plan_retirement(&self, version: KeyVersion) -> Result<KeyPlan, EnclaveError>;

    /// Put a plan into effect. Fails with `RotationConflict` if the table
    /// changed since the plan was made.
    fn apply(&self, plan: &KeyPlan) -> Result<KeyVersionInfo, EnclaveError>;

    /// Snapshot of all known versions, ascending.
    fn versions(&self) -> Vec<KeyVersionInfo>;

    /// Create a new version and make it current.
    fn rotate(&self) -> Result<KeyVersionInfo, EnclaveError> {
        let plan = self.plan_rotation()?;
        self.apply(&plan)
    }

    /// Mark a version retired. Keys are derived from the master secret, so
    /// retirement is a status change: `get_key` refuses the version from
    /// then on and its cached copy is zeroized.
    fn retire(&self, version: KeyVersion) -> Result<KeyVersionInfo, EnclaveError> {
        let plan = self.plan_retirement(version)?;
        self.apply(&plan)
    }
}

// ─── Argon2id-derived implementation ─────────────────────────────────────────

struct RingState {
    current: KeyVersion,
    /// Bumped by every applied plan.
    generation: u64,
    versions: BTreeMap<KeyVersion, KeyVersionInfo>,
    cache: HashMap<KeyVersion, Arc<KeyMaterial>>,
}

/// Key ring deriving each version's key from the master secret.
pub struct KeyRing {
    master: Zeroizing<Vec<u8>>,
    kdf: KdfParams,
    state: RwLock<RingState>,
}

impl KeyRing {
    /// A fresh ring with a single active version.
    pub fn new(master: Zeroizing<Vec<u8>>, kdf: KdfParams) -> Self {
        let info = KeyVersionInfo {
            version: INITIAL_VERSION,
            status: KeyStatus::Active,
            created_at: now(),
            retired_at: None,
        };
        Self::from_parts(master, kdf, INITIAL_VERSION, vec![info])
    }

    /// Rebuild a ring from persisted version metadata. The highest active
    /// version becomes current; an empty list yields a fresh ring.
    pub fn restore(
        master: Zeroizing<Vec<u8>>,
        kdf: KdfParams,
        versions: Vec<KeyVersionInfo>,
    ) -> Result<Self, EnclaveError> {
        if versions.is_empty() {
            return Ok(Self::new(master, kdf));
        }

        let current = versions
            .iter()
            .filter(|v| v.status == KeyStatus::Active)
            .map(|v| v.version)
            .max()
            .ok_or_else(|| {
                EnclaveError::RotationConflict("no active key version to restore".to_string())
            })?;

        Ok(Self::from_parts(master, kdf, current, versions))
    }

    fn from_parts(
        master: Zeroizing<Vec<u8>>,
        kdf: KdfParams,
        current: KeyVersion,
        versions: Vec<KeyVersionInfo>,
    ) -> Self {
        let versions = versions.into_iter().map(|v| (v.version, v)).collect();
        Self {
            master,
            kdf,
            state: RwLock::new(RingState {
                current,
                generation: 0,
                versions,
                cache: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn derive(&self, version: KeyVersion) -> Result<KeyMaterial, EnclaveError> {
        let label = format!("credvault::kek::{}", version);
        let key = derive_key(&self.master, label.as_bytes(), &self.kdf)?;
        Ok(KeyMaterial(key))
    }
}

fn is_active(state: &RingState, version: KeyVersion) -> bool {
    matches!(
        state.versions.get(&version),
        Some(info) if info.status == KeyStatus::Active
    )
}

impl KeyManager for KeyRing {
    fn get_key(&self, version: KeyVersion) -> Result<Arc<KeyMaterial>, EnclaveError> {
        {
            let state = self.read();
            if !is_active(&state, version) {
                return Err(EnclaveError::KeyUnavailable(version));
            }
            if let Some(key) = state.cache.get(&version) {
                return Ok(Arc::clone(key));
            }
        }

        // Derivation is deliberately slow; run it outside the lock.
        let derived = Arc::new(self.derive(version)?);

        let mut state = self.write();
        if !is_active(&state, version) {
            return Err(EnclaveError::KeyUnavailable(version));
        }
        let key = state
            .cache
            .entry(version)
            .or_insert_with(|| Arc::clone(&derived));
        Ok(Arc::clone(key))
    }

    fn current_version(&self) -> KeyVersion {
        self.read().current
    }

    fn plan_rotation(&self) -> Result<KeyPlan, EnclaveError> {
        let state = self.read();
        let next = state
            .versions
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| EnclaveError::RotationConflict("key version space exhausted".to_string()))?;

        let changed = KeyVersionInfo {
            version: next,
            status: KeyStatus::Active,
            created_at: now(),
            retired_at: None,
        };
        let mut versions: Vec<KeyVersionInfo> = state.versions.values().cloned().collect();
        versions.push(changed.clone());
        Ok(KeyPlan {
            changed,
            versions,
            generation: state.generation,
        })
    }

    fn plan_retirement(&self, version: KeyVersion) -> Result<KeyPlan, EnclaveError> {
        let state = self.read();
        if version == state.current {
            return Err(EnclaveError::RotationConflict(format!(
                "key version {} is current, rotate before retiring it",
                version
            )));
        }

        let mut changed = state
            .versions
            .get(&version)
            .cloned()
            .ok_or(EnclaveError::KeyUnavailable(version))?;
        if changed.status == KeyStatus::Active {
            changed.status = KeyStatus::Retired;
            changed.retired_at = Some(now());
        }
        let versions = state
            .versions
            .values()
            .map(|v| if v.version == version { changed.clone() } else { v.clone() })
            .collect();
        Ok(KeyPlan {
            changed,
            versions,
            generation: state.generation,
        })
    }

    fn apply(&self, plan: &KeyPlan) -> Result<KeyVersionInfo, EnclaveError> {
        let mut state = self.write();
        if state.generation != plan.generation {
            return Err(EnclaveError::RotationConflict(
                "key versions changed since the plan was made".to_string(),
            ));
        }

        let previous = state.current;
        state.versions = plan.versions.iter().map(|v| (v.version, v.clone())).collect();
        state.generation += 1;
        let changed = &plan.changed;
        match changed.status {
            KeyStatus::Active => {
                state.current = changed.version;
                tracing::info!(previous, current = changed.version, "Key version rotated");
            }
            KeyStatus::Retired => {
                state.cache.remove(&changed.version);
                tracing::warn!(
                    version = changed.version,
                    "Key version retired, unseals under it now fail"
                );
            }
        }
        Ok(changed.clone())
    }

    fn versions(&self) -> Vec<KeyVersionInfo> {
        self.read().versions.values().cloned().collect()
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Cheap Argon2 settings so tests do not spend seconds deriving keys.
    pub fn light_kdf() -> KdfParams {
        KdfParams {
            m_cost: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }

    pub fn key_ring() -> Arc<KeyRing> {
        Arc::new(KeyRing::new(Zeroizing::new(vec![9u8; 32]), light_kdf()))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
