// Credvault: Persistence ports and SQLite implementations
//
// The lifecycle core depends only on the traits below. `save` methods are
// optimistic: the entity carries the version the caller read, the write
// only lands if the stored version still matches, and the stored version
// is bumped by one. A miss is reported as `VersionConflict` when the row
// exists and `NotFound` when it does not.

use std::sync::Arc;

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::db::{
    is_unique_violation, opt_ts_column, parsed_column, ts_column, uuid_column, Database,
};
use super::models::{Credential, CredentialFilter, CredentialType};
use super::StoreError;
use crate::clock;
use crate::enclave::{KeyStatus, KeyVersion, KeyVersionInfo, SealedSecret};
use crate::lifecycle::CredentialState;

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Storage of credential type reference data.
pub trait CredentialTypeRepository: Send + Sync {
    /// Insert a new type. Fails with `DuplicateCode` if the code is taken.
    fn insert(&self, ty: &CredentialType) -> Result<(), StoreError>;

    /// Version-checked update. Returns the stored entity.
    fn save(&self, ty: &CredentialType) -> Result<CredentialType, StoreError>;

    fn find_by_id(&self, id: &Uuid) -> Result<Option<CredentialType>, StoreError>;

    fn find_by_code(&self, code: &str) -> Result<Option<CredentialType>, StoreError>;

    fn find_all(&self) -> Result<Vec<CredentialType>, StoreError>;
}

/// Storage of credential records. Page keys are opaque, ascending integers.
pub trait CredentialRepository: Send + Sync {
    fn insert(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Version-checked update. Returns the stored entity.
    fn save(&self, credential: &Credential) -> Result<Credential, StoreError>;

    /// Includes tombstoned records.
    fn find_by_id(&self, id: &Uuid) -> Result<Option<Credential>, StoreError>;

    fn find_page(
        &self,
        filter: &CredentialFilter,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(i64, Credential)>, StoreError>;

    /// Credentials a sweep may need to act on at `now`: PENDING, EXPIRED,
    /// REVOKED, and ACTIVE ones whose expiry has passed.
    fn find_due_page(
        &self,
        now: NaiveDateTime,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(i64, Credential)>, StoreError>;

    /// Hard delete. Returns true if the row existed.
    fn delete(&self, id: &Uuid) -> Result<bool, StoreError>;

    /// Number of records still holding ciphertext sealed under `version`.
    fn count_live_for_key_version(&self, version: KeyVersion) -> Result<u64, StoreError>;

    fn references_type(&self, type_id: &Uuid) -> Result<bool, StoreError>;
}

/// Durable record of key version metadata (never key material).
pub trait KeyVersionRepository: Send + Sync {
    fn save_all(&self, versions: &[KeyVersionInfo]) -> Result<(), StoreError>;

    fn find_all(&self) -> Result<Vec<KeyVersionInfo>, StoreError>;
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("version {} out of range", value)))
}

// ─── Credential types ────────────────────────────────────────────────────────

const TYPE_COLUMNS: &str =
    "id, code, name, description, category, active, version, created_at, updated_at";

pub struct SqliteCredentialTypeRepository {
    db: Arc<Database>,
}

impl SqliteCredentialTypeRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn row_to_type(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialType> {
        let version: i64 = row.get(6)?;
        Ok(CredentialType {
            id: uuid_column(row, 0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            category: row.get(4)?,
            active: row.get(5)?,
            version: version as u64,
            created_at: ts_column(row, 7)?,
            updated_at: ts_column(row, 8)?,
        })
    }

    fn find_one(
        conn: &Connection,
        column: &str,
        value: &str,
    ) -> Result<Option<CredentialType>, StoreError> {
        let sql = format!(
            "SELECT {} FROM credential_types WHERE {} = ?1",
            TYPE_COLUMNS, column
        );
        Ok(conn
            .query_row(&sql, params![value], Self::row_to_type)
            .optional()?)
    }
}

fn map_code_conflict(err: rusqlite::Error, code: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::DuplicateCode(code.to_string())
    } else {
        StoreError::Database(err)
    }
}

impl CredentialTypeRepository for SqliteCredentialTypeRepository {
    fn insert(&self, ty: &CredentialType) -> Result<(), StoreError> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO credential_types
                (id, code, name, description, category, active, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                ty.id.to_string(),
                ty.code,
                ty.name,
                ty.description,
                ty.category,
                ty.active,
                to_i64(ty.version)?,
                clock::to_text(&ty.created_at),
                clock::to_text(&ty.updated_at),
            ],
        )
        .map_err(|e| map_code_conflict(e, &ty.code))?;
        Ok(())
    }

    fn save(&self, ty: &CredentialType) -> Result<CredentialType, StoreError> {
        let conn = self.db.conn()?;
        let affected = conn
            .execute(
                "UPDATE credential_types
                 SET code = ?1, name = ?2, description = ?3, category = ?4, active = ?5,
                     version = version + 1, updated_at = ?6
                 WHERE id = ?7 AND version = ?8",
                params![
                    ty.code,
                    ty.name,
                    ty.description,
                    ty.category,
                    ty.active,
                    clock::to_text(&ty.updated_at),
                    ty.id.to_string(),
                    to_i64(ty.version)?,
                ],
            )
            .map_err(|e| map_code_conflict(e, &ty.code))?;

        if affected == 0 {
            return match Self::find_one(&conn, "id", &ty.id.to_string())? {
                Some(_) => Err(StoreError::VersionConflict {
                    entity: "credential type",
                    id: ty.id.to_string(),
                    expected: ty.version,
                }),
                None => Err(StoreError::NotFound(format!("Credential type {}", ty.id))),
            };
        }

        Ok(CredentialType {
            version: ty.version + 1,
            ..ty.clone()
        })
    }

    fn find_by_id(&self, id: &Uuid) -> Result<Option<CredentialType>, StoreError> {
        Self::find_one(&*self.db.conn()?, "id", &id.to_string())
    }

    fn find_by_code(&self, code: &str) -> Result<Option<CredentialType>, StoreError> {
        Self::find_one(&*self.db.conn()?, "code", code)
    }

    fn find_all(&self) -> Result<Vec<CredentialType>, StoreError> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credential_types ORDER BY code ASC",
            TYPE_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_type)?;

        let mut types = Vec::new();
        for row in rows {
            types.push(row?);
        }
        Ok(types)
    }
}

// ─── Credentials ─────────────────────────────────────────────────────────────

const CREDENTIAL_COLUMNS: &str = "id, type_id, owner_id, state, key_version, wrapped_key, \
     key_nonce, nonce, ciphertext, version, created_at, updated_at, expires_at, deleted_at, rowid";

pub struct SqliteCredentialRepository {
    db: Arc<Database>,
}

impl SqliteCredentialRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Parse a credential row together with its page key.
    fn row_to_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Credential)> {
        let key_version: Option<KeyVersion> = row.get(4)?;
        let wrapped_key: Option<Vec<u8>> = row.get(5)?;
        let key_nonce: Option<Vec<u8>> = row.get(6)?;
        let nonce: Option<Vec<u8>> = row.get(7)?;
        let ciphertext: Option<Vec<u8>> = row.get(8)?;

        let sealed = match (key_version, wrapped_key, key_nonce, nonce, ciphertext) {
            (Some(key_version), Some(wrapped_key), Some(key_nonce), Some(nonce), Some(ciphertext)) => {
                Some(SealedSecret {
                    key_version,
                    wrapped_key,
                    key_nonce,
                    nonce,
                    ciphertext,
                })
            }
            _ => None,
        };

        let version: i64 = row.get(9)?;
        let credential = Credential {
            id: uuid_column(row, 0)?,
            type_id: uuid_column(row, 1)?,
            owner_id: row.get(2)?,
            state: parsed_column::<CredentialState>(row, 3)?,
            sealed,
            version: version as u64,
            created_at: ts_column(row, 10)?,
            updated_at: ts_column(row, 11)?,
            expires_at: opt_ts_column(row, 12)?,
            deleted_at: opt_ts_column(row, 13)?,
        };
        Ok((row.get(14)?, credential))
    }

    fn query_page(
        conn: &Connection,
        sql: &str,
        args: Vec<Value>,
    ) -> Result<Vec<(i64, Credential)>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), Self::row_to_credential)?;

        let mut page = Vec::new();
        for row in rows {
            page.push(row?);
        }
        Ok(page)
    }
}

impl CredentialRepository for SqliteCredentialRepository {
    fn insert(&self, c: &Credential) -> Result<(), StoreError> {
        let sealed = c.sealed.as_ref();
        self.db.conn()?.execute(
            "INSERT INTO credentials
                (id, type_id, owner_id, state, key_version, wrapped_key, key_nonce, nonce,
                 ciphertext, version, created_at, updated_at, expires_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                c.id.to_string(),
                c.type_id.to_string(),
                c.owner_id,
                c.state.as_str(),
                sealed.map(|s| s.key_version),
                sealed.map(|s| s.wrapped_key.as_slice()),
                sealed.map(|s| s.key_nonce.as_slice()),
                sealed.map(|s| s.nonce.as_slice()),
                sealed.map(|s| s.ciphertext.as_slice()),
                to_i64(c.version)?,
                clock::to_text(&c.created_at),
                clock::to_text(&c.updated_at),
                c.expires_at.as_ref().map(clock::to_text),
                c.deleted_at.as_ref().map(clock::to_text),
            ],
        )?;
        Ok(())
    }

    fn save(&self, c: &Credential) -> Result<Credential, StoreError> {
        let sealed = c.sealed.as_ref();
        let conn = self.db.conn()?;
        let affected = conn.execute(
            "UPDATE credentials
             SET state = ?1, key_version = ?2, wrapped_key = ?3, key_nonce = ?4, nonce = ?5,
                 ciphertext = ?6, version = version + 1, updated_at = ?7, expires_at = ?8,
                 deleted_at = ?9
             WHERE id = ?10 AND version = ?11",
            params![
                c.state.as_str(),
                sealed.map(|s| s.key_version),
                sealed.map(|s| s.wrapped_key.as_slice()),
                sealed.map(|s| s.key_nonce.as_slice()),
                sealed.map(|s| s.nonce.as_slice()),
                sealed.map(|s| s.ciphertext.as_slice()),
                clock::to_text(&c.updated_at),
                c.expires_at.as_ref().map(clock::to_text),
                c.deleted_at.as_ref().map(clock::to_text),
                c.id.to_string(),
                to_i64(c.version)?,
            ],
        )?;

        if affected == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM credentials WHERE id = ?1)",
                params![c.id.to_string()],
                |row| row.get(0),
            )?;
            return Err(if exists {
                StoreError::VersionConflict {
                    entity: "credential",
                    id: c.id.to_string(),
                    expected: c.version,
                }
            } else {
                StoreError::NotFound(format!("Credential {}", c.id))
            });
        }

        Ok(Credential {
            version: c.version + 1,
            ..c.clone()
        })
    }

    fn find_by_id(&self, id: &Uuid) -> Result<Option<Credential>, StoreError> {
        let conn = self.db.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT {} FROM credentials WHERE id = ?1", CREDENTIAL_COLUMNS),
                params![id.to_string()],
                Self::row_to_credential,
            )
            .optional()?;
        Ok(found.map(|(_, c)| c))
    }

    fn find_page(
        &self,
        filter: &CredentialFilter,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(i64, Credential)>, StoreError> {
        let mut sql = format!(
            "SELECT {} FROM credentials WHERE rowid > ?1",
            CREDENTIAL_COLUMNS
        );
        let mut args = vec![Value::Integer(after.unwrap_or(0))];

        if !filter.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        if let Some(owner) = &filter.owner_id {
            args.push(Value::Text(owner.clone()));
            sql.push_str(&format!(" AND owner_id = ?{}", args.len()));
        }
        if let Some(version) = filter.key_version {
            args.push(Value::Integer(i64::from(version)));
            sql.push_str(&format!(
                " AND key_version = ?{} AND ciphertext IS NOT NULL",
                args.len()
            ));
        }
        if !filter.states.is_empty() {
            let mut slots = Vec::with_capacity(filter.states.len());
            for state in &filter.states {
                args.push(Value::Text(state.as_str().to_string()));
                slots.push(format!("?{}", args.len()));
            }
            sql.push_str(&format!(" AND state IN ({})", slots.join(", ")));
        }

        args.push(Value::Integer(limit as i64));
        sql.push_str(&format!(" ORDER BY rowid ASC LIMIT ?{}", args.len()));

        Self::query_page(&*self.db.conn()?, &sql, args)
    }

    fn find_due_page(
        &self,
        now: NaiveDateTime,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(i64, Credential)>, StoreError> {
        let sql = format!(
            "SELECT {} FROM credentials
             WHERE rowid > ?1
               AND deleted_at IS NULL
               AND (state IN ('PENDING', 'EXPIRED', 'REVOKED')
                    OR (state = 'ACTIVE' AND expires_at IS NOT NULL AND expires_at <= ?2))
             ORDER BY rowid ASC LIMIT ?3",
            CREDENTIAL_COLUMNS
        );
        let args = vec![
            Value::Integer(after.unwrap_or(0)),
            Value::Text(clock::to_text(&now)),
            Value::Integer(limit as i64),
        ];
        Self::query_page(&*self.db.conn()?, &sql, args)
    }

    fn delete(&self, id: &Uuid) -> Result<bool, StoreError> {
        let affected = self.db.conn()?.execute(
            "DELETE FROM credentials WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    fn count_live_for_key_version(&self, version: KeyVersion) -> Result<u64, StoreError> {
        let count: i64 = self.db.conn()?.query_row(
            "SELECT count(*) FROM credentials WHERE key_version = ?1 AND ciphertext IS NOT NULL",
            params![version],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn references_type(&self, type_id: &Uuid) -> Result<bool, StoreError> {
        let exists: bool = self.db.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM credentials WHERE type_id = ?1)",
            params![type_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

// ─── Key versions ────────────────────────────────────────────────────────────

pub struct SqliteKeyVersionRepository {
    db: Arc<Database>,
}

impl SqliteKeyVersionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl KeyVersionRepository for SqliteKeyVersionRepository {
    fn save_all(&self, versions: &[KeyVersionInfo]) -> Result<(), StoreError> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;
        for info in versions {
            tx.execute(
                "INSERT INTO key_versions (version, status, created_at, retired_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(version) DO UPDATE SET status = excluded.status,
                                                    retired_at = excluded.retired_at",
                params![
                    info.version,
                    info.status.as_str(),
                    clock::to_text(&info.created_at),
                    info.retired_at.as_ref().map(clock::to_text),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn find_all(&self) -> Result<Vec<KeyVersionInfo>, StoreError> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT version, status, created_at, retired_at FROM key_versions ORDER BY version ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(1)?;
            Ok((
                row.get::<_, KeyVersion>(0)?,
                status,
                ts_column(row, 2)?,
                opt_ts_column(row, 3)?,
            ))
        })?;

        let mut versions = Vec::new();
        for row in rows {
            let (version, status, created_at, retired_at) = row?;
            let status = KeyStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown key status '{}'", status)))?;
            versions.push(KeyVersionInfo {
                version,
                status,
                created_at,
                retired_at,
            });
        }
        Ok(versions)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
