// Credvault: Credential type registry
//
// Reference data is read on every create but written rarely, so validated
// types are cached by code behind an RwLock. Writes drop the affected cache
// entries and bump a generation; a `validate` that loaded from storage only
// fills the cache if no write landed in the meantime.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use super::models::{CredentialType, CredentialTypeDraft};
use super::repository::{CredentialRepository, CredentialTypeRepository};
use super::StoreError;
use crate::clock;

#[derive(Default)]
struct TypeCache {
    generation: u64,
    entries: HashMap<String, CredentialType>,
}

pub struct CredentialTypeRegistry {
    types: Arc<dyn CredentialTypeRepository>,
    credentials: Arc<dyn CredentialRepository>,
    cache: RwLock<TypeCache>,
}

impl CredentialTypeRegistry {
    pub fn new(
        types: Arc<dyn CredentialTypeRepository>,
        credentials: Arc<dyn CredentialRepository>,
    ) -> Self {
        Self {
            types,
            credentials,
            cache: RwLock::new(TypeCache::default()),
        }
    }

    /// Resolve an active type by code. Unknown and inactive codes are `NotFound`.
    pub fn validate(&self, code: &str) -> Result<CredentialType, StoreError> {
        let generation = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(ty) = cache.entries.get(code) {
                return Ok(ty.clone());
            }
            cache.generation
        };

        let ty = self
            .types
            .find_by_code(code)?
            .filter(|t| t.active)
            .ok_or_else(|| StoreError::NotFound(format!("Credential type '{}'", code)))?;

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.generation == generation {
            cache.entries.insert(ty.code.clone(), ty.clone());
        }
        Ok(ty)
    }

    /// Insert a new type or update an existing one.
    pub fn upsert(&self, draft: CredentialTypeDraft) -> Result<CredentialType, StoreError> {
        draft.validate()?;
        let now = clock::now();

        let Some(id) = draft.id else {
            let ty = CredentialType {
                id: Uuid::new_v4(),
                code: draft.code,
                name: draft.name,
                description: draft.description,
                category: draft.category,
                active: draft.active,
                version: 0,
                created_at: now,
                updated_at: now,
            };
            self.types.insert(&ty)?;
            tracing::info!(type_id = %ty.id, code = %ty.code, "Credential type registered");
            return Ok(ty);
        };

        let existing = self
            .types
            .find_by_id(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("Credential type {}", id)))?;
        let expected = draft.version.ok_or_else(|| {
            StoreError::Validation("version is required when updating a type".to_string())
        })?;
        if expected != existing.version {
            return Err(StoreError::VersionConflict {
                entity: "credential type",
                id: id.to_string(),
                expected,
            });
        }
        if draft.code != existing.code && self.credentials.references_type(&id)? {
            return Err(StoreError::ImmutableCode(existing.code));
        }

        let updated = self.types.save(&CredentialType {
            id,
            code: draft.code,
            name: draft.name,
            description: draft.description,
            category: draft.category,
            active: draft.active,
            version: expected,
            created_at: existing.created_at,
            updated_at: now,
        })?;

        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            cache.generation += 1;
            cache.entries.remove(&existing.code);
            cache.entries.remove(&updated.code);
        }

        tracing::info!(
            type_id = %updated.id,
            code = %updated.code,
            version = updated.version,
            active = updated.active,
            "Credential type updated"
        );
        Ok(updated)
    }

    /// All types, active or not, ordered by code.
    pub fn list(&self) -> Result<Vec<CredentialType>, StoreError> {
        self.types.find_all()
    }

    pub fn get_by_id(&self, id: &Uuid) -> Result<CredentialType, StoreError> {
        self.types
            .find_by_id(id)?
            .ok_or_else(|| StoreError::NotFound(format!("Credential type {}", id)))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
