// Credvault: Access log persistence

use std::sync::Arc;

use chrono::NaiveDateTime;
use rusqlite::params;
use rusqlite::types::Value;

use super::models::{AccessLogCursor, AccessLogFilter, AccessOutcome, CredentialAccessLog};
use crate::clock;
use crate::store::{parsed_column, ts_column, uuid_column, Database, StoreError};

/// Append-only storage for access log entries.
pub trait AccessLogRepository: Send + Sync {
    fn append(&self, entry: &CredentialAccessLog) -> Result<(), StoreError>;

    /// Entries matching `filter` strictly after `after`, ordered by
    /// `(accessed_at, insertion sequence)`.
    fn find_page(
        &self,
        filter: &AccessLogFilter,
        after: Option<&AccessLogCursor>,
        limit: usize,
    ) -> Result<Vec<(AccessLogCursor, CredentialAccessLog)>, StoreError>;

    /// Retention purge. Returns the number of entries removed.
    fn delete_before(&self, cutoff: NaiveDateTime) -> Result<u64, StoreError>;
}

pub struct SqliteAccessLogRepository {
    db: Arc<Database>,
}

impl SqliteAccessLogRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl AccessLogRepository for SqliteAccessLogRepository {
    fn append(&self, entry: &CredentialAccessLog) -> Result<(), StoreError> {
        self.db.conn()?.execute(
            "INSERT INTO credential_access_log
                (id, credential_id, accessor_id, accessed_at, outcome, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.to_string(),
                entry.credential_id.to_string(),
                entry.accessor_id,
                clock::to_text(&entry.accessed_at),
                entry.outcome.as_str(),
                entry.reason,
            ],
        )?;
        Ok(())
    }

    fn find_page(
        &self,
        filter: &AccessLogFilter,
        after: Option<&AccessLogCursor>,
        limit: usize,
    ) -> Result<Vec<(AccessLogCursor, CredentialAccessLog)>, StoreError> {
        let mut sql = String::from(
            "SELECT id, credential_id, accessor_id, accessed_at, outcome, reason, seq
             FROM credential_access_log WHERE 1 = 1",
        );
        let mut args: Vec<Value> = Vec::new();
        let mut bind = |sql: &mut String, clause: &str, value: Value| {
            args.push(value);
            sql.push_str(&clause.replace("?", &format!("?{}", args.len())));
        };

        if let Some(cursor) = after {
            let at = clock::to_text(&cursor.accessed_at);
            bind(&mut sql, " AND (accessed_at > ?", Value::Text(at.clone()));
            bind(&mut sql, " OR (accessed_at = ?", Value::Text(at));
            bind(&mut sql, " AND seq > ?))", Value::Integer(cursor.seq));
        }
        if let Some(id) = filter.credential_id {
            bind(&mut sql, " AND credential_id = ?", Value::Text(id.to_string()));
        }
        if let Some(accessor) = &filter.accessor_id {
            bind(&mut sql, " AND accessor_id = ?", Value::Text(accessor.clone()));
        }
        if let Some(from) = &filter.from {
            bind(&mut sql, " AND accessed_at >= ?", Value::Text(clock::to_text(from)));
        }
        if let Some(to) = &filter.to {
            bind(&mut sql, " AND accessed_at < ?", Value::Text(clock::to_text(to)));
        }
        if let Some(outcome) = filter.outcome {
            bind(&mut sql, " AND outcome = ?", Value::Text(outcome.as_str().to_string()));
        }
        bind(
            &mut sql,
            " ORDER BY accessed_at ASC, seq ASC LIMIT ?",
            Value::Integer(limit as i64),
        );

        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let entry = CredentialAccessLog {
                id: uuid_column(row, 0)?,
                credential_id: uuid_column(row, 1)?,
                accessor_id: row.get(2)?,
                accessed_at: ts_column(row, 3)?,
                outcome: parsed_column::<AccessOutcome>(row, 4)?,
                reason: row.get(5)?,
            };
            let cursor = AccessLogCursor {
                accessed_at: entry.accessed_at,
                seq: row.get(6)?,
            };
            Ok((cursor, entry))
        })?;

        let mut page = Vec::new();
        for row in rows {
            page.push(row?);
        }
        Ok(page)
    }

    fn delete_before(&self, cutoff: NaiveDateTime) -> Result<u64, StoreError> {
        let removed = self.db.conn()?.execute(
            "DELETE FROM credential_access_log WHERE accessed_at < ?1",
            params![clock::to_text(&cutoff)],
        )?;
        Ok(removed as u64)
    }
}
