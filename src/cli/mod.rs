// Credvault: CLI Module
//
// Command-line interface using clap derive macros. Every command opens the
// vault with the master secret from the platform keyring.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{execute, parse_ttl};

/// Credvault: credential lifecycle and access-audit vault.
#[derive(Parser, Debug)]
#[command(name = "credvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, env = "CREDVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the encrypted database. Overrides the config file.
    #[arg(long, global = true, env = "CREDVAULT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the master secret and the encrypted database.
    Init,

    /// Register a credential type.
    TypeAdd {
        /// Unique code (e.g., "API_KEY").
        code: String,

        /// Display name.
        #[arg(long)]
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Category (e.g., "AUTHENTICATION").
        #[arg(long)]
        category: Option<String>,
    },

    /// List credential types.
    TypeList,

    /// Store a new credential.
    Add {
        /// Owner of the credential.
        #[arg(long)]
        owner: String,

        /// Credential type code.
        #[arg(long = "type")]
        type_code: String,

        /// The secret value. Read from stdin when omitted, which keeps it
        /// out of shell history.
        #[arg(long)]
        secret: Option<String>,

        /// Time to live (e.g., "90d", "12h", "30m").
        #[arg(long)]
        ttl: Option<String>,

        /// Start PENDING until confirmed.
        #[arg(long, default_value = "false")]
        pending: bool,
    },

    /// Retrieve a secret. The attempt is audit-logged.
    Access {
        id: String,

        /// Identity recorded in the access log.
        #[arg(long, env = "USER")]
        accessor: String,
    },

    /// Activate a PENDING credential.
    Confirm {
        id: String,

        /// Version last read (see `show`).
        #[arg(long)]
        version: u64,
    },

    /// Revoke an ACTIVE credential. Irreversible.
    Revoke {
        id: String,

        #[arg(long)]
        version: u64,
    },

    /// Destroy an EXPIRED or REVOKED credential, purging its secret.
    Destroy {
        id: String,

        #[arg(long)]
        version: u64,
    },

    /// Delete a credential (hard or tombstone, per configuration).
    Delete { id: String },

    /// Show credential metadata. Never prints the secret.
    Show { id: String },

    /// List credentials of an owner.
    List {
        #[arg(long)]
        owner: String,
    },

    /// View the access log.
    Audit {
        /// Only entries for this credential.
        id: Option<String>,

        #[arg(long)]
        accessor: Option<String>,

        /// SUCCESS, DENIED or ERROR.
        #[arg(long)]
        outcome: Option<String>,

        /// Maximum entries to print.
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Resume after a cursor printed by a previous call.
        #[arg(long)]
        after: Option<String>,
    },

    /// Apply due expiry and retention transitions.
    Sweep {
        /// Keep running, sweeping every N seconds until interrupted.
        #[arg(long)]
        every: Option<u64>,
    },

    /// Start sealing with a new key version.
    RotateKey,

    /// Reseal credentials still under an old key version.
    Reencrypt {
        /// Key version to move away from.
        from_version: u32,
    },

    /// Retire a key version once nothing is sealed with it.
    RetireKey { version: u32 },
}
