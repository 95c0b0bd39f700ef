// Credvault: Credential Lifecycle Manager
//
// Drives credentials through the state machine and gates every secret
// access. Time-based transitions (expiry, pending grace) are applied
// lazily when a credential is touched, and in bulk by `sweep`. Every
// access writes exactly one audit entry, whatever the outcome.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use uuid::Uuid;

use super::CredentialState;
use crate::audit::{AccessAuditor, AccessOutcome, AuditError};
use crate::clock;
use crate::enclave::{EnclaveError, KeyManager, KeyPlan, KeyVersion, KeyVersionInfo, SecretBytes};
use crate::error::VaultError;
use crate::store::{
    Credential, CredentialFilter, CredentialStore, KeyVersionRepository, NewCredential, Paginated,
    StoreError,
};

/// Attempts to apply a lazy transition before giving up on a busy record.
const MAX_SETTLE_ATTEMPTS: usize = 3;

/// Reason recorded for a successful access.
const REASON_OK: &str = "OK";

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// How long a PENDING credential may wait for confirmation.
    pub pending_grace: Duration,
    /// How long EXPIRED and REVOKED credentials are kept before a sweep
    /// destroys them.
    pub credential_retention: Duration,
    /// Access log retention. `None` keeps entries forever.
    pub access_log_retention: Option<Duration>,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            pending_grace: Duration::seconds(86_400),
            credential_retention: Duration::days(30),
            access_log_retention: Some(Duration::days(365)),
        }
    }
}

// ─── Access results ──────────────────────────────────────────────────────────

/// Why an access was denied. Recorded in the audit log only; callers see
/// a uniform `AccessDenied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotFound,
    Pending,
    Expired,
    Revoked,
    Destroyed,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::NotFound => "NOT_FOUND",
            DenyReason::Pending => "PENDING",
            DenyReason::Expired => "EXPIRED",
            DenyReason::Revoked => "REVOKED",
            DenyReason::Destroyed => "DESTROYED",
        }
    }

    fn for_state(state: CredentialState) -> Option<Self> {
        match state {
            CredentialState::Active => None,
            CredentialState::Pending => Some(DenyReason::Pending),
            CredentialState::Expired => Some(DenyReason::Expired),
            CredentialState::Revoked => Some(DenyReason::Revoked),
            CredentialState::Destroyed => Some(DenyReason::Destroyed),
        }
    }
}

/// Outcome of `access`: the primary result plus the audit write status.
pub struct AccessReport {
    pub secret: Result<SecretBytes, VaultError>,
    /// Id of the access log entry, or the secondary write failure.
    pub audit: Result<Uuid, AuditError>,
}

impl AccessReport {
    pub fn audit_failed(&self) -> bool {
        self.audit.is_err()
    }

    /// The secret, only if the audit entry was also written.
    pub fn into_result(self) -> Result<SecretBytes, VaultError> {
        let secret = self.secret?;
        self.audit?;
        Ok(secret)
    }
}

impl fmt::Debug for AccessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = match &self.secret {
            Ok(bytes) => format!("Ok([{} bytes REDACTED])", bytes.len()),
            Err(e) => format!("Err({})", e),
        };
        f.debug_struct("AccessReport")
            .field("secret", &secret)
            .field("audit", &self.audit)
            .finish()
    }
}

enum AccessFailure {
    Denied(DenyReason),
    Failed(VaultError),
}

impl From<StoreError> for AccessFailure {
    fn from(e: StoreError) -> Self {
        if e.is_not_found() {
            AccessFailure::Denied(DenyReason::NotFound)
        } else {
            AccessFailure::Failed(e.into())
        }
    }
}

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: u64,
    pub expired: u64,
    pub destroyed: u64,
    /// Credentials skipped because another writer changed them mid-sweep.
    pub conflicts: u64,
    pub access_logs_purged: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReencryptReport {
    pub from_version: KeyVersion,
    pub to_version: KeyVersion,
    pub scanned: u64,
    pub resealed: u64,
    /// Credentials destroyed or already resealed by someone else.
    pub skipped: u64,
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct CredentialLifecycleManager {
    store: Arc<CredentialStore>,
    auditor: Arc<AccessAuditor>,
    key_versions: Arc<dyn KeyVersionRepository>,
    /// Serializes key plans so each one is persisted and applied in turn.
    key_lock: Mutex<()>,
    policy: LifecyclePolicy,
}

impl CredentialLifecycleManager {
    pub fn new(
        store: Arc<CredentialStore>,
        auditor: Arc<AccessAuditor>,
        key_versions: Arc<dyn KeyVersionRepository>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            store,
            auditor,
            key_versions,
            key_lock: Mutex::new(()),
            policy,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn auditor(&self) -> &Arc<AccessAuditor> {
        &self.auditor
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    fn keys(&self) -> &Arc<dyn KeyManager> {
        self.store.sealer().keys()
    }

    pub fn create(&self, request: NewCredential) -> Result<Credential, VaultError> {
        Ok(self.store.create(request)?)
    }

    /// Fetch a credential with any due lazy transition applied.
    pub fn get(&self, id: &Uuid) -> Result<Credential, VaultError> {
        let credential = self.store.get(id)?;
        Ok(self.settle(credential, clock::now())?)
    }

    /// PENDING -> ACTIVE.
    pub fn confirm(&self, id: &Uuid, expected_version: u64) -> Result<Credential, VaultError> {
        self.transition(id, expected_version, CredentialState::Active)
    }

    /// ACTIVE -> REVOKED. Irreversible.
    pub fn revoke(&self, id: &Uuid, expected_version: u64) -> Result<Credential, VaultError> {
        self.transition(id, expected_version, CredentialState::Revoked)
    }

    /// Move to DESTROYED and purge the secret.
    pub fn destroy(&self, id: &Uuid, expected_version: u64) -> Result<Credential, VaultError> {
        self.transition(id, expected_version, CredentialState::Destroyed)
    }

    pub fn delete(&self, id: &Uuid) -> Result<(), VaultError> {
        Ok(self.store.delete(id)?)
    }

    fn transition(
        &self,
        id: &Uuid,
        expected_version: u64,
        target: CredentialState,
    ) -> Result<Credential, VaultError> {
        let current = self.store.get(id)?;
        if current.version != expected_version {
            return Err(StoreError::VersionConflict {
                entity: "credential",
                id: id.to_string(),
                expected: expected_version,
            }
            .into());
        }

        // A lazy transition may land first; the caller's version is then
        // stale only in the sense that time moved the record on.
        let settled = self.settle(current, clock::now())?;
        if settled.version != expected_version && !settled.state.can_transition_to(target) {
            if settled.state == target {
                return Ok(settled);
            }
            return Err(StoreError::InvalidTransition {
                from: settled.state,
                to: target,
            }
            .into());
        }

        Ok(self.store.update_state(id, settled.version, target)?)
    }

    /// The time-driven transition due for `credential` at `now`, if any.
    fn due_transition(&self, credential: &Credential, now: NaiveDateTime) -> Option<CredentialState> {
        match credential.state {
            CredentialState::Active if credential.is_past_expiry(now) => {
                Some(CredentialState::Expired)
            }
            CredentialState::Pending if self.grace_elapsed(credential, now) => {
                Some(CredentialState::Destroyed)
            }
            _ => None,
        }
    }

    /// A grace window reaching past the calendar never elapses.
    fn grace_elapsed(&self, credential: &Credential, now: NaiveDateTime) -> bool {
        credential
            .created_at
            .checked_add_signed(self.policy.pending_grace)
            .is_some_and(|deadline| now >= deadline)
    }

    /// Apply the due lazy transition, re-reading on version conflicts.
    fn settle(&self, credential: Credential, now: NaiveDateTime) -> Result<Credential, StoreError> {
        let mut credential = credential;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(target) = self.due_transition(&credential, now) else {
                return Ok(credential);
            };
            match self.store.update_state(&credential.id, credential.version, target) {
                Ok(updated) => {
                    tracing::info!(
                        credential_id = %updated.id,
                        state = %updated.state,
                        "Lazy transition applied"
                    );
                    return Ok(updated);
                }
                Err(e) if e.is_version_conflict() && attempt < MAX_SETTLE_ATTEMPTS => {
                    credential = self.store.get(&credential.id)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ─── Access ──────────────────────────────────────────────────────────────

    /// Audited secret access.
    ///
    /// Denials of any kind surface as `AccessDenied`; the concrete reason
    /// goes to the access log. Unseal failures are recorded as ERROR and
    /// returned as they are.
    pub fn access(&self, id: &Uuid, accessor_id: &str) -> AccessReport {
        let guard = self.auditor.begin(*id, accessor_id);
        let result = self.try_access(id, guard.started_at());

        let (outcome, reason) = match &result {
            Ok(_) => (AccessOutcome::Success, REASON_OK),
            Err(AccessFailure::Denied(reason)) => (AccessOutcome::Denied, reason.code()),
            Err(AccessFailure::Failed(e)) => (AccessOutcome::Error, e.reason_code()),
        };
        let audit = guard.complete(outcome, reason);

        let secret = result.map_err(|failure| match failure {
            AccessFailure::Denied(reason) => {
                tracing::warn!(
                    credential_id = %id,
                    accessor_id,
                    reason = reason.code(),
                    "Credential access denied"
                );
                VaultError::AccessDenied
            }
            AccessFailure::Failed(e) => e,
        });
        if secret.is_ok() {
            tracing::info!(credential_id = %id, accessor_id, "Credential accessed");
        }

        AccessReport { secret, audit }
    }

    fn try_access(&self, id: &Uuid, now: NaiveDateTime) -> Result<SecretBytes, AccessFailure> {
        let credential = self.store.get(id)?;
        let credential = self.settle(credential, now)?;

        if let Some(reason) = DenyReason::for_state(credential.state) {
            return Err(AccessFailure::Denied(reason));
        }

        let sealed = credential.sealed.as_ref().ok_or_else(|| {
            AccessFailure::Failed(
                StoreError::Corrupt(format!("active credential {} has no sealed secret", id)).into(),
            )
        })?;

        self.store.sealer().unseal(sealed).map_err(|e| {
            if matches!(e, EnclaveError::IntegrityViolation) {
                tracing::error!(
                    credential_id = %id,
                    key_version = sealed.key_version,
                    "SECURITY: sealed secret failed integrity check"
                );
            }
            AccessFailure::Failed(e.into())
        })
    }

    // ─── Sweep ───────────────────────────────────────────────────────────────

    /// Credentials a sweep at `now` would look at.
    pub fn sweep_candidates(&self, now: NaiveDateTime) -> Paginated<'static, i64, Credential> {
        self.store.sweep_candidates(now)
    }

    /// Apply due transitions in bulk, destroy credentials past retention,
    /// and purge access log entries past their retention.
    pub fn sweep(&self, now: NaiveDateTime) -> Result<SweepReport, VaultError> {
        let mut report = SweepReport::default();

        for item in self.sweep_candidates(now) {
            let credential = item?;
            report.scanned += 1;
            let id = credential.id;
            match self.sweep_one(credential, now, &mut report) {
                Ok(()) => {}
                Err(e) if e.is_version_conflict() => {
                    report.conflicts += 1;
                    tracing::debug!(credential_id = %id, "Sweep skipped credential changed concurrently");
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let log_cutoff = self
            .policy
            .access_log_retention
            .and_then(|retention| now.checked_sub_signed(retention));
        if let Some(cutoff) = log_cutoff {
            report.access_logs_purged = self.auditor.purge_before(cutoff)?;
        }

        tracing::info!(
            scanned = report.scanned,
            expired = report.expired,
            destroyed = report.destroyed,
            conflicts = report.conflicts,
            access_logs_purged = report.access_logs_purged,
            "Sweep completed"
        );
        Ok(report)
    }

    fn sweep_one(
        &self,
        credential: Credential,
        now: NaiveDateTime,
        report: &mut SweepReport,
    ) -> Result<(), StoreError> {
        let mut credential = credential;
        if let Some(target) = self.due_transition(&credential, now) {
            credential = self
                .store
                .update_state(&credential.id, credential.version, target)?;
            if target == CredentialState::Expired {
                report.expired += 1;
            } else {
                report.destroyed += 1;
            }
        }

        if self.retention_elapsed(&credential, now) {
            self.store
                .update_state(&credential.id, credential.version, CredentialState::Destroyed)?;
            report.destroyed += 1;
        }
        Ok(())
    }

    fn retention_elapsed(&self, credential: &Credential, now: NaiveDateTime) -> bool {
        let since = match credential.state {
            CredentialState::Expired => credential.expires_at.unwrap_or(credential.updated_at),
            CredentialState::Revoked => credential.updated_at,
            _ => return false,
        };
        since
            .checked_add_signed(self.policy.credential_retention)
            .is_some_and(|deadline| now >= deadline)
    }

    // ─── Key rotation ────────────────────────────────────────────────────────

    /// Start sealing with a new key version. Older versions stay readable.
    pub fn rotate_key(&self) -> Result<KeyVersionInfo, VaultError> {
        let _lock = self.key_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let plan = self.keys().plan_rotation()?;
        self.commit_key_plan(&plan)
    }

    /// Reseal every live credential still under `from_version` with the
    /// current version. Integrity failures abort the run.
    pub fn reencrypt(&self, from_version: KeyVersion) -> Result<ReencryptReport, VaultError> {
        let to_version = self.keys().current_version();
        if from_version == to_version {
            return Err(EnclaveError::RotationConflict(format!(
                "key version {} is current, rotate before re-encrypting",
                from_version
            ))
            .into());
        }

        let mut report = ReencryptReport {
            from_version,
            to_version,
            scanned: 0,
            resealed: 0,
            skipped: 0,
        };

        for item in self.store.list(CredentialFilter::sealed_with(from_version)) {
            let credential = item?;
            report.scanned += 1;
            if self.reseal_one(credential, from_version, to_version)? {
                report.resealed += 1;
            } else {
                report.skipped += 1;
            }
        }

        tracing::info!(
            from_version,
            to_version,
            resealed = report.resealed,
            skipped = report.skipped,
            "Re-encryption completed"
        );
        Ok(report)
    }

    /// Returns false when the credential no longer needs resealing.
    fn reseal_one(
        &self,
        credential: Credential,
        from_version: KeyVersion,
        to_version: KeyVersion,
    ) -> Result<bool, VaultError> {
        let sealer = self.store.sealer();
        let mut credential = credential;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(sealed) = credential
                .sealed
                .as_ref()
                .filter(|s| s.key_version == from_version)
            else {
                return Ok(false);
            };

            let plaintext = sealer.unseal(sealed).map_err(|e| {
                if matches!(e, EnclaveError::IntegrityViolation) {
                    tracing::error!(
                        credential_id = %credential.id,
                        key_version = from_version,
                        "SECURITY: integrity violation during re-encryption, aborting"
                    );
                }
                e
            })?;
            let resealed = sealer.seal(&plaintext, to_version)?;

            match self.store.reseal(&credential.id, credential.version, resealed) {
                Ok(_) => return Ok(true),
                Err(e) if e.is_version_conflict() && attempt < MAX_SETTLE_ATTEMPTS => {
                    credential = match self.store.get(&credential.id) {
                        Ok(fresh) => fresh,
                        Err(e) if e.is_not_found() => return Ok(false),
                        Err(e) => return Err(e.into()),
                    };
                }
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Retire `version`. Refused while any live ciphertext still uses it.
    pub fn retire_key(&self, version: KeyVersion) -> Result<KeyVersionInfo, VaultError> {
        let live = self.store.count_live_for_key_version(version)?;
        if live > 0 {
            return Err(EnclaveError::RotationConflict(format!(
                "{} credential(s) still sealed with key version {}, re-encrypt first",
                live, version
            ))
            .into());
        }

        let _lock = self.key_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let plan = self.keys().plan_retirement(version)?;
        self.commit_key_plan(&plan)
    }

    /// Record the planned version table, then put it into effect. A failed
    /// write leaves the ring untouched.
    fn commit_key_plan(&self, plan: &KeyPlan) -> Result<KeyVersionInfo, VaultError> {
        self.key_versions.save_all(&plan.versions)?;
        Ok(self.keys().apply(plan)?)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::{disk_full, FailingLog};
    use crate::audit::{AccessLogFilter, AccessLogRepository, SqliteAccessLogRepository};
    use crate::enclave::testing::key_ring;
    use crate::enclave::{CryptoSealer, KeyStatus};
    use crate::store::{
        CredentialRepository, CredentialTypeDraft, CredentialTypeRegistry, Database,
        SqliteCredentialRepository, SqliteCredentialTypeRepository, SqliteKeyVersionRepository,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;

    /// Key version table whose writes fail while `failing` is set.
    struct FlakyKeyVersions {
        inner: SqliteKeyVersionRepository,
        failing: AtomicBool,
    }

    impl KeyVersionRepository for FlakyKeyVersions {
        fn save_all(&self, versions: &[KeyVersionInfo]) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.inner.save_all(versions)
        }

        fn find_all(&self) -> Result<Vec<KeyVersionInfo>, StoreError> {
            self.inner.find_all()
        }
    }

    struct Fixture {
        db: Arc<Database>,
        manager: Arc<CredentialLifecycleManager>,
    }

    fn fixture_with(policy: LifecyclePolicy, log: Option<Arc<dyn AccessLogRepository>>) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let key_versions = Arc::new(SqliteKeyVersionRepository::new(Arc::clone(&db)));
        build(db, policy, log, key_versions)
    }

    fn build(
        db: Arc<Database>,
        policy: LifecyclePolicy,
        log: Option<Arc<dyn AccessLogRepository>>,
        key_versions: Arc<dyn KeyVersionRepository>,
    ) -> Fixture {
        let repo: Arc<dyn CredentialRepository> =
            Arc::new(SqliteCredentialRepository::new(Arc::clone(&db)));
        let registry = Arc::new(CredentialTypeRegistry::new(
            Arc::new(SqliteCredentialTypeRepository::new(Arc::clone(&db))),
            Arc::clone(&repo),
        ));
        registry
            .upsert(CredentialTypeDraft::new("API_KEY", "API Key").with_category("AUTHENTICATION"))
            .unwrap();
        let store = Arc::new(CredentialStore::new(
            repo,
            registry,
            Arc::new(CryptoSealer::new(key_ring())),
        ));
        let log = log.unwrap_or_else(|| Arc::new(SqliteAccessLogRepository::new(Arc::clone(&db))));
        let manager = Arc::new(CredentialLifecycleManager::new(
            store,
            Arc::new(AccessAuditor::new(log)),
            key_versions,
            policy,
        ));
        Fixture { db, manager }
    }

    fn fixture() -> Fixture {
        fixture_with(LifecyclePolicy::default(), None)
    }

    fn api_key(manager: &CredentialLifecycleManager, secret: &[u8]) -> Credential {
        manager
            .create(NewCredential::new("svc-billing", "API_KEY", secret))
            .unwrap()
    }

    fn log_for(manager: &CredentialLifecycleManager, id: Uuid) -> Vec<(AccessOutcome, String)> {
        manager
            .auditor()
            .query(AccessLogFilter::for_credential(id))
            .map(|r| {
                let entry = r.unwrap();
                (entry.outcome, entry.reason)
            })
            .collect()
    }

    #[test]
    fn test_api_key_round_trip_is_audited() {
        let f = fixture();
        let cred = api_key(&f.manager, b"sk_live_abc123");

        let report = f.manager.access(&cred.id, "alice");
        assert!(!report.audit_failed());
        assert_eq!(&report.into_result().unwrap()[..], b"sk_live_abc123");
        assert_eq!(
            log_for(&f.manager, cred.id),
            vec![(AccessOutcome::Success, "OK".to_string())]
        );
    }

    #[test]
    fn test_zero_ttl_is_denied_and_expired() {
        let f = fixture();
        let cred = f
            .manager
            .create(NewCredential::new("alice", "API_KEY", b"x").with_ttl(Duration::zero()))
            .unwrap();

        let report = f.manager.access(&cred.id, "alice");
        assert!(matches!(report.secret, Err(VaultError::AccessDenied)));
        assert_eq!(f.manager.store().get(&cred.id).unwrap().state, CredentialState::Expired);
        assert_eq!(
            log_for(&f.manager, cred.id),
            vec![(AccessOutcome::Denied, "EXPIRED".to_string())]
        );
    }

    #[test]
    fn test_denials_are_uniform() {
        let f = fixture();
        let cred = api_key(&f.manager, b"x");
        f.manager.revoke(&cred.id, 0).unwrap();
        let missing = Uuid::new_v4();

        let revoked = f.manager.access(&cred.id, "alice").secret.unwrap_err();
        let unknown = f.manager.access(&missing, "alice").secret.unwrap_err();
        assert_eq!(revoked.to_string(), unknown.to_string());

        assert_eq!(log_for(&f.manager, cred.id)[0].1, "REVOKED");
        assert_eq!(log_for(&f.manager, missing)[0].1, "NOT_FOUND");
    }

    #[test]
    fn test_revoked_cannot_return_to_active() {
        let f = fixture();
        let cred = api_key(&f.manager, b"x");
        let revoked = f.manager.revoke(&cred.id, 0).unwrap();

        let err = f
            .manager
            .store()
            .update_state(&cred.id, revoked.version, CredentialState::Active)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert!(matches!(
            f.manager.confirm(&cred.id, revoked.version),
            Err(VaultError::Store(StoreError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn test_destroyed_never_yields_plaintext() {
        let f = fixture();
        let cred = api_key(&f.manager, b"x");
        let revoked = f.manager.revoke(&cred.id, 0).unwrap();
        let destroyed = f.manager.destroy(&cred.id, revoked.version).unwrap();
        assert!(destroyed.sealed.is_none());

        let report = f.manager.access(&cred.id, "alice");
        assert!(matches!(report.secret, Err(VaultError::AccessDenied)));
        assert_eq!(log_for(&f.manager, cred.id)[0].1, "DESTROYED");
    }

    #[test]
    fn test_destroy_races_concurrent_access() {
        let f = fixture();
        let cred = api_key(&f.manager, b"short-lived");
        let destroyed = Arc::new(AtomicBool::new(false));
        let barrier = Arc::new(Barrier::new(9));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = Arc::clone(&f.manager);
                let destroyed = Arc::clone(&destroyed);
                let barrier = Arc::clone(&barrier);
                let id = cred.id;
                thread::spawn(move || {
                    barrier.wait();
                    let mut after_destroy = Vec::new();
                    for _ in 0..25 {
                        let started_after = destroyed.load(Ordering::SeqCst);
                        let report = manager.access(&id, &format!("worker-{}", i));
                        if started_after {
                            after_destroy.push(report);
                        } else if let Ok(secret) = &report.secret {
                            assert_eq!(&secret[..], b"short-lived");
                        }
                    }
                    after_destroy
                })
            })
            .collect();

        barrier.wait();
        let revoked = f.manager.revoke(&cred.id, 0).unwrap();
        f.manager.destroy(&cred.id, revoked.version).unwrap();
        destroyed.store(true, Ordering::SeqCst);

        let reasons: std::collections::HashMap<Uuid, String> = f
            .manager
            .auditor()
            .query(AccessLogFilter::for_credential(cred.id))
            .map(|r| {
                let entry = r.unwrap();
                (entry.id, entry.reason)
            })
            .collect();

        for handle in handles {
            for report in handle.join().unwrap() {
                assert!(matches!(report.secret, Err(VaultError::AccessDenied)));
                let entry_id = report.audit.unwrap();
                assert_eq!(reasons[&entry_id], "DESTROYED");
            }
        }
        assert_eq!(reasons.len(), 8 * 25);
        assert!(f.manager.store().get(&cred.id).unwrap().sealed.is_none());
    }

    #[test]
    fn test_destroy_active_is_invalid() {
        let f = fixture();
        let cred = api_key(&f.manager, b"x");
        assert!(matches!(
            f.manager.destroy(&cred.id, 0),
            Err(VaultError::Store(StoreError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn test_stale_version_conflicts() {
        let f = fixture();
        let cred = api_key(&f.manager, b"x");
        f.manager.revoke(&cred.id, 0).unwrap();
        assert!(f.manager.destroy(&cred.id, 0).unwrap_err().is_version_conflict());
    }

    #[test]
    fn test_pending_requires_confirmation() {
        let f = fixture();
        let cred = f
            .manager
            .create(NewCredential::new("alice", "API_KEY", b"x").pending())
            .unwrap();

        assert!(f.manager.access(&cred.id, "alice").secret.is_err());
        f.manager.confirm(&cred.id, 0).unwrap();
        assert!(f.manager.access(&cred.id, "alice").secret.is_ok());

        let reasons: Vec<String> = log_for(&f.manager, cred.id).into_iter().map(|e| e.1).collect();
        assert_eq!(reasons, vec!["PENDING", "OK"]);
    }

    #[test]
    fn test_pending_past_grace_is_destroyed_lazily() {
        let policy = LifecyclePolicy {
            pending_grace: Duration::zero(),
            ..LifecyclePolicy::default()
        };
        let f = fixture_with(policy, None);
        let cred = f
            .manager
            .create(NewCredential::new("alice", "API_KEY", b"x").pending())
            .unwrap();

        assert!(f.manager.access(&cred.id, "alice").secret.is_err());
        let stored = f.manager.store().get(&cred.id).unwrap();
        assert_eq!(stored.state, CredentialState::Destroyed);
        assert!(stored.sealed.is_none());
        assert!(f.manager.confirm(&cred.id, stored.version).is_err());
    }

    #[test]
    fn test_exactly_one_log_entry_per_access() {
        let f = fixture();
        let live = api_key(&f.manager, b"x");
        let gone = api_key(&f.manager, b"y");
        f.manager.revoke(&gone.id, 0).unwrap();

        for _ in 0..3 {
            f.manager.access(&live.id, "alice");
            f.manager.access(&gone.id, "alice");
        }
        assert_eq!(log_for(&f.manager, live.id).len(), 3);
        assert_eq!(log_for(&f.manager, gone.id).len(), 3);
    }

    #[test]
    fn test_audit_write_failure_is_reported() {
        let f = fixture_with(LifecyclePolicy::default(), Some(Arc::new(FailingLog)));
        let cred = api_key(&f.manager, b"x");

        let report = f.manager.access(&cred.id, "alice");
        assert!(report.secret.is_ok(), "Primary result is kept");
        assert!(matches!(report.audit, Err(AuditError::WriteFailure(_))));
        assert!(matches!(
            report.into_result(),
            Err(VaultError::Audit(AuditError::WriteFailure(_)))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_is_integrity_violation() {
        let f = fixture();
        let cred = api_key(&f.manager, b"x");
        f.db.conn()
            .unwrap()
            .execute(
                "UPDATE credentials SET ciphertext = zeroblob(17) WHERE id = ?1",
                [cred.id.to_string()],
            )
            .unwrap();

        let report = f.manager.access(&cred.id, "alice");
        assert!(matches!(
            report.secret,
            Err(VaultError::Enclave(EnclaveError::IntegrityViolation))
        ));
        assert_eq!(
            log_for(&f.manager, cred.id),
            vec![(AccessOutcome::Error, "INTEGRITY_VIOLATION".to_string())]
        );
    }

    #[test]
    fn test_rotation_during_concurrent_access() {
        let f = fixture();
        let cred = api_key(&f.manager, b"rotating-secret");
        let barrier = Arc::new(Barrier::new(11));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let manager = Arc::clone(&f.manager);
                let barrier = Arc::clone(&barrier);
                let id = cred.id;
                thread::spawn(move || {
                    barrier.wait();
                    manager.access(&id, &format!("worker-{}", i)).into_result()
                })
            })
            .collect();

        barrier.wait();
        let rotated = f.manager.rotate_key().unwrap();
        assert_eq!(rotated.version, 2);

        for handle in handles {
            let secret = handle.join().unwrap().expect("access must succeed during rotation");
            assert_eq!(&secret[..], b"rotating-secret");
        }
        assert_eq!(log_for(&f.manager, cred.id).len(), 10);

        let fresh = api_key(&f.manager, b"after-rotation");
        assert_eq!(fresh.key_version(), Some(2), "New seals use the new version");
    }

    #[test]
    fn test_reencrypt_then_retire() {
        let f = fixture();
        let a = api_key(&f.manager, b"alpha");
        let b = api_key(&f.manager, b"beta");
        f.manager.revoke(&b.id, 0).unwrap();
        f.manager.rotate_key().unwrap();

        let err = f.manager.retire_key(1).unwrap_err();
        assert!(matches!(
            err,
            VaultError::Enclave(EnclaveError::RotationConflict(_))
        ));

        let report = f.manager.reencrypt(1).unwrap();
        assert_eq!(report.resealed, 2);
        assert_eq!(report.to_version, 2);

        let retired = f.manager.retire_key(1).unwrap();
        assert!(retired.retired_at.is_some());
        assert_eq!(&f.manager.access(&a.id, "alice").into_result().unwrap()[..], b"alpha");

        let persisted = SqliteKeyVersionRepository::new(Arc::clone(&f.db)).find_all().unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[test]
    fn test_reencrypt_current_version_conflicts() {
        let f = fixture();
        assert!(matches!(
            f.manager.reencrypt(1),
            Err(VaultError::Enclave(EnclaveError::RotationConflict(_)))
        ));
    }

    #[test]
    fn test_sweep_expires_and_respects_retention() {
        let f = fixture();
        let lapsed = f
            .manager
            .create(NewCredential::new("alice", "API_KEY", b"x").with_ttl(Duration::zero()))
            .unwrap();
        api_key(&f.manager, b"keep");

        let report = f.manager.sweep(clock::now()).unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.destroyed, 0, "Retention has not elapsed");
        assert_eq!(f.manager.store().get(&lapsed.id).unwrap().state, CredentialState::Expired);

        let later = clock::now() + Duration::days(31);
        let report = f.manager.sweep(later).unwrap();
        assert_eq!(report.destroyed, 1);
        assert!(f.manager.store().get(&lapsed.id).unwrap().sealed.is_none());
    }

    #[test]
    fn test_sweep_purges_old_access_logs() {
        let f = fixture();
        let cred = api_key(&f.manager, b"x");
        f.manager.access(&cred.id, "alice");

        let report = f.manager.sweep(clock::now() + Duration::days(366)).unwrap();
        assert_eq!(report.access_logs_purged, 1);
        assert!(log_for(&f.manager, cred.id).is_empty());
    }

    #[test]
    fn test_periods_past_the_calendar_never_elapse() {
        let policy = LifecyclePolicy {
            pending_grace: Duration::MAX,
            credential_retention: Duration::MAX,
            access_log_retention: Some(Duration::MAX),
        };
        let f = fixture_with(policy, None);
        let pending = f
            .manager
            .create(NewCredential::new("alice", "API_KEY", b"x").pending())
            .unwrap();
        let revoked = api_key(&f.manager, b"y");
        f.manager.revoke(&revoked.id, 0).unwrap();
        f.manager.access(&pending.id, "alice");

        let report = f.manager.sweep(clock::now()).unwrap();
        assert_eq!(report.destroyed, 0);
        assert_eq!(report.access_logs_purged, 0);
        assert_eq!(f.manager.get(&pending.id).unwrap().state, CredentialState::Pending);
        assert_eq!(f.manager.store().get(&revoked.id).unwrap().state, CredentialState::Revoked);
    }

    #[test]
    fn test_failed_key_persist_leaves_ring_unchanged() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let key_versions = Arc::new(FlakyKeyVersions {
            inner: SqliteKeyVersionRepository::new(Arc::clone(&db)),
            failing: AtomicBool::new(true),
        });
        let f = build(db, LifecyclePolicy::default(), None, key_versions.clone());

        assert!(matches!(
            f.manager.rotate_key(),
            Err(VaultError::Store(StoreError::Database(_)))
        ));
        assert_eq!(f.manager.keys().current_version(), 1);
        let cred = api_key(&f.manager, b"x");
        assert_eq!(cred.key_version(), Some(1));

        key_versions.failing.store(false, Ordering::SeqCst);
        f.manager.rotate_key().unwrap();
        f.manager.reencrypt(1).unwrap();

        key_versions.failing.store(true, Ordering::SeqCst);
        assert!(f.manager.retire_key(1).is_err());
        assert!(f.manager.keys().get_key(1).is_ok(), "Version 1 stays usable");

        let persisted = key_versions.find_all().unwrap();
        assert_eq!(persisted.len(), 2);
        assert!(persisted.iter().all(|v| v.status == KeyStatus::Active));
    }
}
