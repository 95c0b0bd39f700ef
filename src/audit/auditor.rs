// Credvault: Access Auditor
//
// Every access attempt produces exactly one log entry. Callers open an
// `AuditGuard` before doing any work and complete it with the outcome; a
// guard dropped without completing (early return, unwinding) writes an
// ERROR entry instead so an attempt is never silently lost.

use std::sync::Arc;

use chrono::NaiveDateTime;
use uuid::Uuid;

use super::models::{AccessLogCursor, AccessLogFilter, AccessOutcome, CredentialAccessLog};
use super::repository::AccessLogRepository;
use super::AuditError;
use crate::clock;
use crate::store::{Paginated, DEFAULT_PAGE_SIZE};

/// Reason recorded when an attempt ends without an explicit outcome.
pub const ABORTED: &str = "ABORTED";

pub struct AccessAuditor {
    repo: Arc<dyn AccessLogRepository>,
    page_size: usize,
}

impl AccessAuditor {
    pub fn new(repo: Arc<dyn AccessLogRepository>) -> Self {
        Self {
            repo,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Append one entry stamped with the current time. The credential does
    /// not need to exist.
    pub fn record(
        &self,
        credential_id: Uuid,
        accessor_id: &str,
        outcome: AccessOutcome,
        reason: &str,
    ) -> Result<Uuid, AuditError> {
        self.record_at(credential_id, accessor_id, clock::now(), outcome, reason)
    }

    pub(crate) fn record_at(
        &self,
        credential_id: Uuid,
        accessor_id: &str,
        accessed_at: NaiveDateTime,
        outcome: AccessOutcome,
        reason: &str,
    ) -> Result<Uuid, AuditError> {
        let entry = CredentialAccessLog {
            id: Uuid::new_v4(),
            credential_id,
            accessor_id: accessor_id.to_string(),
            accessed_at,
            outcome,
            reason: reason.to_string(),
        };

        if let Err(e) = self.repo.append(&entry) {
            tracing::error!(
                credential_id = %credential_id,
                accessor_id,
                outcome = %outcome,
                error = %e,
                "Failed to write access log entry"
            );
            return Err(AuditError::WriteFailure(e));
        }

        tracing::debug!(
            log_id = %entry.id,
            credential_id = %credential_id,
            accessor_id,
            outcome = %outcome,
            reason,
            "Access recorded"
        );
        Ok(entry.id)
    }

    /// Start auditing one access attempt. The attempt time is taken now.
    pub fn begin(&self, credential_id: Uuid, accessor_id: &str) -> AuditGuard<'_> {
        AuditGuard {
            auditor: self,
            credential_id,
            accessor_id: accessor_id.to_string(),
            started_at: clock::now(),
            completed: false,
        }
    }

    /// Lazily walk entries matching `filter` in timestamp order.
    pub fn query(
        &self,
        filter: AccessLogFilter,
    ) -> Paginated<'static, AccessLogCursor, CredentialAccessLog> {
        self.walk(filter, None)
    }

    /// Resume a walk after `cursor`.
    pub fn query_from(
        &self,
        filter: AccessLogFilter,
        cursor: AccessLogCursor,
    ) -> Paginated<'static, AccessLogCursor, CredentialAccessLog> {
        self.walk(filter, Some(cursor))
    }

    fn walk(
        &self,
        filter: AccessLogFilter,
        after: Option<AccessLogCursor>,
    ) -> Paginated<'static, AccessLogCursor, CredentialAccessLog> {
        let repo = Arc::clone(&self.repo);
        Paginated::new(self.page_size, after, move |after, limit| {
            repo.find_page(&filter, after, limit)
        })
    }

    /// Retention purge of entries older than `cutoff`. Only sweeps call this.
    pub fn purge_before(&self, cutoff: NaiveDateTime) -> Result<u64, AuditError> {
        let removed = self.repo.delete_before(cutoff)?;
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "Access log entries purged");
        }
        Ok(removed)
    }
}

/// One in-flight access attempt. Writes its entry exactly once.
pub struct AuditGuard<'a> {
    auditor: &'a AccessAuditor,
    credential_id: Uuid,
    accessor_id: String,
    started_at: NaiveDateTime,
    completed: bool,
}

impl AuditGuard<'_> {
    pub fn started_at(&self) -> NaiveDateTime {
        self.started_at
    }

    pub fn complete(mut self, outcome: AccessOutcome, reason: &str) -> Result<Uuid, AuditError> {
        self.completed = true;
        self.auditor.record_at(
            self.credential_id,
            &self.accessor_id,
            self.started_at,
            outcome,
            reason,
        )
    }
}

impl Drop for AuditGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        tracing::warn!(
            credential_id = %self.credential_id,
            accessor_id = %self.accessor_id,
            "Access attempt ended without an outcome"
        );
        // Already logged at error level by record_at
        let _ = self.auditor.record_at(
            self.credential_id,
            &self.accessor_id,
            self.started_at,
            AccessOutcome::Error,
            ABORTED,
        );
    }
}

// ─── Test Support ────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::store::StoreError;

    /// The error SQLite reports when the volume is full.
    pub fn disk_full() -> StoreError {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            Some("database or disk is full".to_string()),
        ))
    }

    /// Repository whose writes always fail.
    pub struct FailingLog;

    impl AccessLogRepository for FailingLog {
        fn append(&self, _entry: &CredentialAccessLog) -> Result<(), StoreError> {
            Err(disk_full())
        }

        fn find_page(
            &self,
            _filter: &AccessLogFilter,
            _after: Option<&AccessLogCursor>,
            _limit: usize,
        ) -> Result<Vec<(AccessLogCursor, CredentialAccessLog)>, StoreError> {
            Ok(Vec::new())
        }

        fn delete_before(&self, _cutoff: NaiveDateTime) -> Result<u64, StoreError> {
            Ok(0)
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::testing::FailingLog;
    use super::*;
    use crate::audit::SqliteAccessLogRepository;
    use crate::store::Database;
    use chrono::Duration;

    fn auditor(page_size: usize) -> AccessAuditor {
        let db = Arc::new(Database::open_in_memory().unwrap());
        AccessAuditor::new(Arc::new(SqliteAccessLogRepository::new(db))).with_page_size(page_size)
    }

    fn all(auditor: &AccessAuditor, filter: AccessLogFilter) -> Vec<CredentialAccessLog> {
        auditor.query(filter).map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_record_for_unknown_credential_succeeds() {
        let auditor = auditor(10);
        let id = Uuid::new_v4();
        auditor
            .record(id, "alice", AccessOutcome::Denied, "NOT_FOUND")
            .unwrap();

        let entries = all(&auditor, AccessLogFilter::for_credential(id));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AccessOutcome::Denied);
        assert_eq!(entries[0].reason, "NOT_FOUND");
    }

    #[test]
    fn test_guard_complete_writes_once() {
        let auditor = auditor(10);
        let id = Uuid::new_v4();
        let guard = auditor.begin(id, "alice");
        let started = guard.started_at();
        guard.complete(AccessOutcome::Success, "OK").unwrap();

        let entries = all(&auditor, AccessLogFilter::for_credential(id));
        assert_eq!(entries.len(), 1, "Completed guard must not write again on drop");
        assert_eq!(entries[0].accessed_at, started);
    }

    #[test]
    fn test_dropped_guard_records_aborted() {
        let auditor = auditor(10);
        let id = Uuid::new_v4();
        {
            let _guard = auditor.begin(id, "alice");
        }
        let entries = all(&auditor, AccessLogFilter::for_credential(id));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, AccessOutcome::Error);
        assert_eq!(entries[0].reason, ABORTED);
    }

    #[test]
    fn test_guard_records_when_unwinding() {
        let auditor = auditor(10);
        let id = Uuid::new_v4();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = auditor.begin(id, "alice");
            panic!("access interrupted");
        }));
        assert!(result.is_err());

        let entries = all(&auditor, AccessLogFilter::for_credential(id));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason, ABORTED);
    }

    #[test]
    fn test_query_orders_by_time_then_insertion() {
        let auditor = auditor(2);
        let id = Uuid::new_v4();
        let base = clock::now();

        auditor
            .record_at(id, "late", base + Duration::seconds(5), AccessOutcome::Success, "OK")
            .unwrap();
        auditor
            .record_at(id, "tie-a", base, AccessOutcome::Success, "OK")
            .unwrap();
        auditor
            .record_at(id, "tie-b", base, AccessOutcome::Denied, "REVOKED")
            .unwrap();

        let order: Vec<String> = all(&auditor, AccessLogFilter::default())
            .into_iter()
            .map(|e| e.accessor_id)
            .collect();
        assert_eq!(order, vec!["tie-a", "tie-b", "late"]);
    }

    #[test]
    fn test_query_filters() {
        let auditor = auditor(10);
        let id = Uuid::new_v4();
        let base = clock::now();
        for (offset, who, outcome) in [
            (0, "alice", AccessOutcome::Success),
            (10, "bob", AccessOutcome::Denied),
            (20, "alice", AccessOutcome::Denied),
        ] {
            auditor
                .record_at(id, who, base + Duration::seconds(offset), outcome, "X")
                .unwrap();
        }
        auditor
            .record_at(Uuid::new_v4(), "alice", base, AccessOutcome::Success, "X")
            .unwrap();

        assert_eq!(all(&auditor, AccessLogFilter::for_credential(id)).len(), 3);
        assert_eq!(all(&auditor, AccessLogFilter::by_accessor("alice")).len(), 3);

        let denied = AccessLogFilter {
            credential_id: Some(id),
            outcome: Some(AccessOutcome::Denied),
            ..AccessLogFilter::default()
        };
        assert_eq!(all(&auditor, denied).len(), 2);

        // from inclusive, to exclusive
        let window = AccessLogFilter {
            credential_id: Some(id),
            from: Some(base + Duration::seconds(10)),
            to: Some(base + Duration::seconds(20)),
            ..AccessLogFilter::default()
        };
        let hits = all(&auditor, window);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].accessor_id, "bob");
    }

    #[test]
    fn test_query_resumes_from_cursor() {
        let auditor = auditor(2);
        let id = Uuid::new_v4();
        let base = clock::now();
        for i in 0..5 {
            auditor
                .record_at(
                    id,
                    &format!("caller-{}", i),
                    base + Duration::seconds(i),
                    AccessOutcome::Success,
                    "OK",
                )
                .unwrap();
        }

        let mut walk = auditor.query(AccessLogFilter::for_credential(id));
        walk.next().unwrap().unwrap();
        walk.next().unwrap().unwrap();
        walk.next().unwrap().unwrap();
        let token = walk.cursor().unwrap().encode().unwrap();
        drop(walk);

        let cursor = AccessLogCursor::decode(&token).unwrap();
        let rest: Vec<String> = auditor
            .query_from(AccessLogFilter::for_credential(id), cursor)
            .map(|r| r.unwrap().accessor_id)
            .collect();
        assert_eq!(rest, vec!["caller-3", "caller-4"]);
    }

    #[test]
    fn test_purge_before_cutoff() {
        let auditor = auditor(10);
        let id = Uuid::new_v4();
        let base = clock::now();
        auditor
            .record_at(id, "old", base - Duration::days(400), AccessOutcome::Success, "OK")
            .unwrap();
        auditor
            .record_at(id, "new", base, AccessOutcome::Success, "OK")
            .unwrap();

        assert_eq!(auditor.purge_before(base - Duration::days(365)).unwrap(), 1);
        let left = all(&auditor, AccessLogFilter::default());
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].accessor_id, "new");
    }

    #[test]
    fn test_write_failure_is_reported() {
        let auditor = AccessAuditor::new(Arc::new(FailingLog));
        let err = auditor
            .record(Uuid::new_v4(), "alice", AccessOutcome::Success, "OK")
            .unwrap_err();
        assert!(matches!(err, AuditError::WriteFailure(_)));

        let guard = auditor.begin(Uuid::new_v4(), "alice");
        assert!(matches!(
            guard.complete(AccessOutcome::Success, "OK"),
            Err(AuditError::WriteFailure(_))
        ));
    }
}
