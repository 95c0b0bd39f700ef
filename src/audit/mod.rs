// Credvault: Audit Module
//
// Append-only record of every access attempt against a credential. The
// log refers to credentials by id only, so entries outlive the records
// they describe.

mod auditor;
mod error;
mod models;
mod repository;

pub use auditor::{AccessAuditor, AuditGuard, ABORTED};
pub use error::AuditError;
pub use models::{AccessLogCursor, AccessLogFilter, AccessOutcome, CredentialAccessLog};
pub use repository::{AccessLogRepository, SqliteAccessLogRepository};

#[cfg(test)]
pub(crate) use auditor::testing;
