// Credvault: Vault assembly
//
// Wires the enclave, store, audit and lifecycle components together over
// one encrypted database. The master secret comes from an injected
// provider; it derives both the SQLCipher key and the key ring.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::audit::{AccessAuditor, SqliteAccessLogRepository};
use crate::config::VaultConfig;
use crate::enclave::{
    derive_db_key, CryptoSealer, KdfParams, KeyManager, KeyRing, MasterKeyProvider,
};
use crate::error::{Result, VaultError};
use crate::lifecycle::CredentialLifecycleManager;
use crate::store::{
    CredentialRepository, CredentialStore, CredentialTypeRegistry, Database, KeyVersionRepository,
    SqliteCredentialRepository, SqliteCredentialTypeRepository, SqliteKeyVersionRepository,
    StoreError,
};

/// Convert key bytes to the hex string format SQLCipher expects.
fn key_to_hex(key: &[u8]) -> Zeroizing<String> {
    Zeroizing::new(key.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Key derivation must not drift after init: it derives both the database
/// key and every key-encryption key.
fn write_kdf(config: &VaultConfig) -> Result<()> {
    let content = toml::to_string(&config.kdf).map_err(|e| VaultError::Config(e.to_string()))?;
    std::fs::write(config.kdf_path(), content)?;
    tracing::debug!(path = %config.kdf_path().display(), "Recorded KDF parameters");
    Ok(())
}

fn read_kdf(config: &VaultConfig) -> Result<Option<KdfParams>> {
    let path = config.kdf_path();
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let kdf = toml::from_str(&content)
        .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(kdf))
}

pub struct Vault {
    config: VaultConfig,
    database: Arc<Database>,
    registry: Arc<CredentialTypeRegistry>,
    manager: Arc<CredentialLifecycleManager>,
}

impl Vault {
    /// Create the data directory, master secret and database if needed.
    pub fn init(config: VaultConfig, provider: &dyn MasterKeyProvider) -> Result<Self> {
        config.policy()?;
        std::fs::create_dir_all(&config.data_dir)?;
        let master = provider.get_or_create_master_secret()?;
        if !config.kdf_path().exists() {
            write_kdf(&config)?;
        }
        Self::open_with(config, master)
    }

    /// Open an initialized vault. Fails with `NotInitialized` otherwise.
    pub fn open(config: VaultConfig, provider: &dyn MasterKeyProvider) -> Result<Self> {
        if !provider.has_master_secret()? || !config.database_path().exists() {
            return Err(StoreError::NotInitialized.into());
        }
        let master = provider.get_or_create_master_secret()?;
        Self::open_with(config, master)
    }

    fn open_with(mut config: VaultConfig, master: Zeroizing<Vec<u8>>) -> Result<Self> {
        if let Some(recorded) = read_kdf(&config)? {
            if recorded != config.kdf {
                tracing::warn!(
                    configured = ?config.kdf,
                    recorded = ?recorded,
                    "KDF parameters differ from those recorded at init, using the recorded ones"
                );
                config.kdf = recorded;
            }
        }

        let db_key = derive_db_key(&master, &config.kdf)?;
        let path = config.database_path();
        let database = Database::open(&path, &key_to_hex(&db_key[..]))?;
        tracing::debug!(path = %path.display(), "Opened vault database");
        Self::from_database(Arc::new(database), master, config)
    }

    /// Assemble a vault over an already open database.
    pub fn from_database(
        database: Arc<Database>,
        master: Zeroizing<Vec<u8>>,
        config: VaultConfig,
    ) -> Result<Self> {
        let policy = config.policy()?;
        let key_versions: Arc<dyn KeyVersionRepository> =
            Arc::new(SqliteKeyVersionRepository::new(Arc::clone(&database)));
        let persisted = key_versions.find_all()?;
        let fresh = persisted.is_empty();
        let ring = KeyRing::restore(master, config.kdf, persisted)?;
        if fresh {
            key_versions.save_all(&ring.versions())?;
        }

        let credentials: Arc<dyn CredentialRepository> =
            Arc::new(SqliteCredentialRepository::new(Arc::clone(&database)));
        let registry = Arc::new(CredentialTypeRegistry::new(
            Arc::new(SqliteCredentialTypeRepository::new(Arc::clone(&database))),
            Arc::clone(&credentials),
        ));
        let store = Arc::new(
            CredentialStore::new(
                credentials,
                Arc::clone(&registry),
                Arc::new(CryptoSealer::new(Arc::new(ring))),
            )
            .with_delete_mode(config.delete_mode)
            .with_page_size(config.page_size),
        );
        let auditor = Arc::new(
            AccessAuditor::new(Arc::new(SqliteAccessLogRepository::new(Arc::clone(&database))))
                .with_page_size(config.page_size),
        );
        let manager = Arc::new(CredentialLifecycleManager::new(
            store,
            auditor,
            key_versions,
            policy,
        ));

        Ok(Self {
            config,
            database,
            registry,
            manager,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn registry(&self) -> &Arc<CredentialTypeRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<CredentialLifecycleManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.manager.store()
    }

    pub fn auditor(&self) -> &Arc<AccessAuditor> {
        self.manager.auditor()
    }

    pub fn keys(&self) -> &Arc<dyn KeyManager> {
        self.store().sealer().keys()
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("database", &self.config.database_path())
            .finish_non_exhaustive()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
