// Credvault: Configuration
//
// Optional TOML file; every field has a default so an empty or missing
// file yields a working vault under the platform data directory.
//
//   data_dir = "/var/lib/credvault"
//   delete_mode = "tombstone"      # or "hard"
//   pending_grace_secs = 86400
//   page_size = 256
//
//   [retention]
//   credential_days = 30
//   access_log_days = 365          # 0 keeps the access log forever
//
//   [kdf]
//   m_cost = 65536
//   t_cost = 3
//   p_cost = 4

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::enclave::{KdfParams, DEFAULT_KEYRING_SERVICE};
use crate::error::VaultError;
use crate::lifecycle::LifecyclePolicy;
use crate::store::{DeleteMode, DEFAULT_PAGE_SIZE};

const APP_DIR: &str = "credvault";
const CONFIG_FILE: &str = "credvault.toml";
const DATABASE_FILE: &str = "credvault.db";
const KDF_FILE: &str = "kdf.toml";

/// Upper bound for every configured period, about a century.
const MAX_PERIOD_DAYS: i64 = 36_525;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days EXPIRED and REVOKED credentials are kept before a sweep destroys them.
    pub credential_days: i64,
    /// Days access log entries are kept. 0 disables purging.
    pub access_log_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            credential_days: 30,
            access_log_days: 365,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub delete_mode: DeleteMode,
    pub pending_grace_secs: i64,
    pub retention: RetentionConfig,
    pub page_size: usize,
    pub kdf: KdfParams,
    pub keyring_service: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            database_file: DATABASE_FILE.to_string(),
            delete_mode: DeleteMode::default(),
            pending_grace_secs: 86_400,
            retention: RetentionConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
            kdf: KdfParams::default(),
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
        }
    }
}

impl VaultConfig {
    /// `<platform data dir>/credvault`, or `./credvault` if there is none.
    pub fn default_data_dir() -> PathBuf {
        dirs_next::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    pub fn default_path() -> PathBuf {
        Self::default_data_dir().join(CONFIG_FILE)
    }

    /// Load from `path`, which must exist when given. Without a path the
    /// default location is used if present, otherwise defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self, VaultError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if required {
                return Err(VaultError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!("No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| VaultError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, VaultError> {
        let config: Self =
            toml::from_str(content).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), VaultError> {
        if self.page_size == 0 {
            return Err(VaultError::Config("page_size must be at least 1".to_string()));
        }
        if !(0..=MAX_PERIOD_DAYS * 86_400).contains(&self.pending_grace_secs) {
            return Err(VaultError::Config(format!(
                "pending_grace_secs must be between 0 and {}",
                MAX_PERIOD_DAYS * 86_400
            )));
        }
        for (name, days) in [
            ("credential_days", self.retention.credential_days),
            ("access_log_days", self.retention.access_log_days),
        ] {
            if !(0..=MAX_PERIOD_DAYS).contains(&days) {
                return Err(VaultError::Config(format!(
                    "retention.{} must be between 0 and {}",
                    name, MAX_PERIOD_DAYS
                )));
            }
        }
        if self.database_file.trim().is_empty() {
            return Err(VaultError::Config("database_file must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Where the Argon2 parameters chosen at init are recorded.
    pub fn kdf_path(&self) -> PathBuf {
        self.data_dir.join(KDF_FILE)
    }

    /// Lifecycle timings. Fails on out-of-range periods, so a config built
    /// in code gets the same checks as one read from a file.
    pub fn policy(&self) -> Result<LifecyclePolicy, VaultError> {
        self.validate()?;
        Ok(LifecyclePolicy {
            pending_grace: Duration::seconds(self.pending_grace_secs),
            credential_retention: Duration::days(self.retention.credential_days),
            access_log_retention: (self.retention.access_log_days > 0)
                .then(|| Duration::days(self.retention.access_log_days)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = VaultConfig::from_toml("").unwrap();
        assert_eq!(config, VaultConfig::default());
        assert_eq!(config.delete_mode, DeleteMode::Tombstone);
        assert_eq!(config.pending_grace_secs, 86_400);
    }

    #[test]
    fn test_partial_file_overrides_fields() {
        let config = VaultConfig::from_toml(
            r#"
            data_dir = "/tmp/vault"
            delete_mode = "hard"

            [retention]
            access_log_days = 0

            [kdf]
            t_cost = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/vault/credvault.db"));
        assert_eq!(config.delete_mode, DeleteMode::Hard);
        assert_eq!(config.retention.credential_days, 30);
        assert_eq!(config.kdf.t_cost, 1);
        assert_eq!(config.kdf.m_cost, 65536);
        assert!(config.policy().unwrap().access_log_retention.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            VaultConfig::from_toml("delete_mode = \"shred\""),
            Err(VaultError::Config(_))
        ));
        assert!(matches!(
            VaultConfig::from_toml("page_size = 0"),
            Err(VaultError::Config(_))
        ));
        assert!(matches!(
            VaultConfig::from_toml("[retention]\ncredential_days = -1"),
            Err(VaultError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_periods_rejected() {
        assert!(matches!(
            VaultConfig::from_toml("pending_grace_secs = 9223372036854775807"),
            Err(VaultError::Config(_))
        ));
        assert!(matches!(
            VaultConfig::from_toml("[retention]\naccess_log_days = 100000000000"),
            Err(VaultError::Config(_))
        ));

        let config = VaultConfig {
            retention: RetentionConfig {
                credential_days: i64::MAX,
                access_log_days: 0,
            },
            ..VaultConfig::default()
        };
        assert!(matches!(config.policy(), Err(VaultError::Config(_))));
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credvault.toml");

        assert!(matches!(
            VaultConfig::load(Some(&path)),
            Err(VaultError::Config(_))
        ));

        std::fs::write(&path, "pending_grace_secs = 60\n").unwrap();
        let config = VaultConfig::load(Some(&path)).unwrap();
        assert_eq!(config.policy().unwrap().pending_grace, Duration::seconds(60));
    }
}
