// Credvault: SQLCipher Database Management
//
// Opens and initializes an encrypted SQLCipher database. The encryption key
// is derived from the master secret in the enclave module and is set via
// PRAGMA before any tables are accessed. The connection sits behind a mutex
// so repositories can be shared across threads.

use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::Connection;

use super::StoreError;
use crate::clock;

/// Wrapper around a SQLCipher-encrypted SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) an encrypted database at the given path.
    /// The `hex_key` must be the hex-encoded 32-byte key derived from Argon2id.
    pub fn open(path: &std::path::Path, hex_key: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Set the SQLCipher encryption key
        conn.pragma_update(None, "key", format!("x'{}'", hex_key))?;

        // Verify the key is correct by reading the schema
        // If the key is wrong, this will fail with "file is not a database"
        conn.execute_batch("SELECT count(*) FROM sqlite_master;")
            .map_err(|_| StoreError::InvalidKey)?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (unencrypted, for testing only).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Lock the underlying connection.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Create tables and indexes if they do not exist yet.
    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        // Overwrite freed pages so purged ciphertext does not linger on disk
        conn.pragma_update(None, "secure_delete", "ON")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS credential_types (
                id              TEXT PRIMARY KEY,
                code            TEXT NOT NULL UNIQUE,
                name            TEXT NOT NULL,
                description     TEXT,
                category        TEXT,
                active          INTEGER NOT NULL DEFAULT 1,
                version         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS credentials (
                id              TEXT PRIMARY KEY,
                type_id         TEXT NOT NULL,
                owner_id        TEXT NOT NULL,
                state           TEXT NOT NULL,
                key_version     INTEGER,
                wrapped_key     BLOB,
                key_nonce       BLOB,
                nonce           BLOB,
                ciphertext      BLOB,
                version         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                expires_at      TEXT,
                deleted_at      TEXT,
                FOREIGN KEY(type_id) REFERENCES credential_types(id)
            );

            CREATE TABLE IF NOT EXISTS credential_access_log (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                credential_id   TEXT NOT NULL,
                accessor_id     TEXT NOT NULL,
                accessed_at     TEXT NOT NULL,
                outcome         TEXT NOT NULL,
                reason          TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS key_versions (
                version         INTEGER PRIMARY KEY,
                status          TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                retired_at      TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_credentials_owner
                ON credentials(owner_id);

            CREATE INDEX IF NOT EXISTS idx_credentials_state
                ON credentials(state);

            CREATE INDEX IF NOT EXISTS idx_credentials_key_version
                ON credentials(key_version);

            CREATE INDEX IF NOT EXISTS idx_access_log_credential
                ON credential_access_log(credential_id, accessed_at);

            CREATE INDEX IF NOT EXISTS idx_access_log_time
                ON credential_access_log(accessed_at, seq);
            ",
        )?;

        tracing::debug!("Database migrations completed successfully");
        Ok(())
    }
}

// ─── Column helpers ──────────────────────────────────────────────────────────

pub(crate) fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    clock::from_text(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_ts_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<NaiveDateTime>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        clock::from_text(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<uuid::Uuid> {
    let text: String = row.get(idx)?;
    uuid::Uuid::parse_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a text column through `FromStr`, reporting failures as conversion errors.
pub(crate) fn parsed_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

/// True for SQLite UNIQUE / PRIMARY KEY constraint failures.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────
