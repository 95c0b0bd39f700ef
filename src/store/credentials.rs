// Credvault: Credential store
//
// Owns credential records. Secrets are sealed before they reach the
// repository and every state change is a version-checked write, so two
// writers racing on one credential cannot both succeed.

use std::sync::Arc;

use chrono::NaiveDateTime;
use uuid::Uuid;

use super::models::{Credential, CredentialFilter, DeleteMode, NewCredential};
use super::page::Paginated;
use super::registry::CredentialTypeRegistry;
use super::repository::CredentialRepository;
use super::StoreError;
use crate::clock;
use crate::enclave::{CryptoSealer, KeyVersion, SealedSecret};
use crate::lifecycle::CredentialState;

pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Attempts for administrative writes that re-read on version conflicts.
const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct CredentialStore {
    repo: Arc<dyn CredentialRepository>,
    registry: Arc<CredentialTypeRegistry>,
    sealer: Arc<CryptoSealer>,
    delete_mode: DeleteMode,
    page_size: usize,
}

impl CredentialStore {
    pub fn new(
        repo: Arc<dyn CredentialRepository>,
        registry: Arc<CredentialTypeRegistry>,
        sealer: Arc<CryptoSealer>,
    ) -> Self {
        Self {
            repo,
            registry,
            sealer,
            delete_mode: DeleteMode::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_delete_mode(mut self, mode: DeleteMode) -> Self {
        self.delete_mode = mode;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn sealer(&self) -> &Arc<CryptoSealer> {
        &self.sealer
    }

    pub fn registry(&self) -> &Arc<CredentialTypeRegistry> {
        &self.registry
    }

    /// Seal and persist a new credential.
    ///
    /// Starts ACTIVE, or PENDING when the request asks for confirmation.
    /// `expires_at` is creation time plus the ttl; no ttl never expires.
    pub fn create(&self, request: NewCredential) -> Result<Credential, StoreError> {
        if request.owner_id.trim().is_empty() {
            return Err(StoreError::Validation("owner_id is required".to_string()));
        }
        if request.ttl.is_some_and(|ttl| ttl < chrono::Duration::zero()) {
            return Err(StoreError::Validation("ttl must not be negative".to_string()));
        }

        let now = clock::now();
        let expires_at = match request.ttl {
            Some(ttl) => Some(now.checked_add_signed(ttl).ok_or_else(|| {
                StoreError::Validation("ttl is too large".to_string())
            })?),
            None => None,
        };

        let ty = self.registry.validate(&request.type_code)?;
        let sealed = self.sealer.seal_current(&request.secret)?;

        let credential = Credential {
            id: Uuid::new_v4(),
            type_id: ty.id,
            owner_id: request.owner_id,
            sealed: Some(sealed),
            state: if request.require_confirmation {
                CredentialState::Pending
            } else {
                CredentialState::Active
            },
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at,
            deleted_at: None,
        };
        self.repo.insert(&credential)?;

        tracing::info!(
            credential_id = %credential.id,
            owner_id = %credential.owner_id,
            type_code = %ty.code,
            state = %credential.state,
            key_version = ?credential.key_version(),
            "Credential created"
        );
        Ok(credential)
    }

    /// Fetch a credential, still sealed. Tombstoned records are `NotFound`.
    pub fn get(&self, id: &Uuid) -> Result<Credential, StoreError> {
        self.repo
            .find_by_id(id)?
            .filter(|c| !c.is_tombstoned())
            .ok_or_else(|| StoreError::NotFound(format!("Credential {}", id)))
    }

    /// Move a credential to `new_state` if it is still at `expected_version`.
    /// Entering DESTROYED purges the sealed secret in the same write.
    pub fn update_state(
        &self,
        id: &Uuid,
        expected_version: u64,
        new_state: CredentialState,
    ) -> Result<Credential, StoreError> {
        let current = self.get(id)?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "credential",
                id: id.to_string(),
                expected: expected_version,
            });
        }
        if !current.state.can_transition_to(new_state) {
            return Err(StoreError::InvalidTransition {
                from: current.state,
                to: new_state,
            });
        }

        let from = current.state;
        let purge = new_state == CredentialState::Destroyed;
        let saved = self.repo.save(&Credential {
            state: new_state,
            sealed: if purge { None } else { current.sealed },
            updated_at: clock::now(),
            ..current
        })?;

        tracing::info!(
            credential_id = %id,
            from = %from,
            to = %new_state,
            version = saved.version,
            purged = purge,
            "Credential state changed"
        );
        Ok(saved)
    }

    /// Remove a credential according to the configured `DeleteMode`.
    /// Access logs referring to it are left alone.
    pub fn delete(&self, id: &Uuid) -> Result<(), StoreError> {
        match self.delete_mode {
            DeleteMode::Hard => {
                if !self.repo.delete(id)? {
                    return Err(StoreError::NotFound(format!("Credential {}", id)));
                }
            }
            DeleteMode::Tombstone => self.tombstone(id)?,
        }

        tracing::info!(credential_id = %id, mode = ?self.delete_mode, "Credential deleted");
        Ok(())
    }

    fn tombstone(&self, id: &Uuid) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.get(id)?;
            let now = clock::now();
            let result = self.repo.save(&Credential {
                state: CredentialState::Destroyed,
                sealed: None,
                updated_at: now,
                deleted_at: Some(now),
                ..current
            });
            match result {
                Ok(_) => return Ok(()),
                Err(e) if e.is_version_conflict() && attempt < MAX_WRITE_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Replace the sealed secret of a live credential, version-checked.
    pub fn reseal(
        &self,
        id: &Uuid,
        expected_version: u64,
        sealed: SealedSecret,
    ) -> Result<Credential, StoreError> {
        let current = self.get(id)?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "credential",
                id: id.to_string(),
                expected: expected_version,
            });
        }
        if current.sealed.is_none() {
            return Err(StoreError::Validation(format!(
                "credential {} has no secret to reseal",
                id
            )));
        }

        let key_version = sealed.key_version;
        let saved = self.repo.save(&Credential {
            sealed: Some(sealed),
            updated_at: clock::now(),
            ..current
        })?;
        tracing::debug!(credential_id = %id, key_version, "Credential resealed");
        Ok(saved)
    }

    pub fn count_live_for_key_version(&self, version: KeyVersion) -> Result<u64, StoreError> {
        self.repo.count_live_for_key_version(version)
    }

    /// Lazily page through credentials matching `filter`.
    pub fn list(&self, filter: CredentialFilter) -> Paginated<'static, i64, Credential> {
        let repo = Arc::clone(&self.repo);
        Paginated::new(self.page_size, None, move |after, limit| {
            repo.find_page(&filter, after.copied(), limit)
        })
    }

    pub fn list_by_owner(&self, owner_id: &str) -> Paginated<'static, i64, Credential> {
        self.list(CredentialFilter::owner(owner_id))
    }

    /// Credentials a sweep at `now` may transition or destroy.
    pub fn sweep_candidates(&self, now: NaiveDateTime) -> Paginated<'static, i64, Credential> {
        let repo = Arc::clone(&self.repo);
        Paginated::new(self.page_size, None, move |after, limit| {
            repo.find_due_page(now, after.copied(), limit)
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
