// Credvault: CLI Command Handlers
//
// Each function handles one CLI subcommand. Handlers are synchronous; the
// async entry point only matters for `sweep --every`, which runs sweeps on
// the blocking pool from a tokio interval.

use std::io::BufRead;
use std::sync::Arc;

use uuid::Uuid;

use crate::audit::{AccessLogCursor, AccessLogFilter, AccessOutcome};
use crate::clock;
use crate::config::VaultConfig;
use crate::enclave::KeyringProvider;
use crate::error::VaultError;
use crate::store::{CredentialTypeDraft, NewCredential};
use crate::vault::Vault;

use super::{Cli, Commands};

/// Execute the parsed CLI command.
pub async fn execute(cli: Cli) -> Result<(), VaultError> {
    let mut config = VaultConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::Init => cmd_init(config),
        Commands::TypeAdd {
            code,
            name,
            description,
            category,
        } => cmd_type_add(&open(config)?, code, name, description, category),
        Commands::TypeList => cmd_type_list(&open(config)?),
        Commands::Add {
            owner,
            type_code,
            secret,
            ttl,
            pending,
        } => cmd_add(&open(config)?, owner, type_code, secret, ttl, pending),
        Commands::Access { id, accessor } => cmd_access(&open(config)?, &id, &accessor),
        Commands::Confirm { id, version } => cmd_confirm(&open(config)?, &id, version),
        Commands::Revoke { id, version } => cmd_revoke(&open(config)?, &id, version),
        Commands::Destroy { id, version } => cmd_destroy(&open(config)?, &id, version),
        Commands::Delete { id } => cmd_delete(&open(config)?, &id),
        Commands::Show { id } => cmd_show(&open(config)?, &id),
        Commands::List { owner } => cmd_list(&open(config)?, &owner),
        Commands::Audit {
            id,
            accessor,
            outcome,
            limit,
            after,
        } => cmd_audit(&open(config)?, id, accessor, outcome, limit, after),
        Commands::Sweep { every } => cmd_sweep(open(config)?, every).await,
        Commands::RotateKey => cmd_rotate_key(&open(config)?),
        Commands::Reencrypt { from_version } => cmd_reencrypt(&open(config)?, from_version),
        Commands::RetireKey { version } => cmd_retire_key(&open(config)?, version),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn open(config: VaultConfig) -> Result<Vault, VaultError> {
    let provider = KeyringProvider::new(&config.keyring_service);
    Vault::open(config, &provider)
}

fn parse_id(id: &str) -> Result<Uuid, VaultError> {
    Uuid::parse_str(id).map_err(|e| VaultError::Other(format!("Invalid UUID: {}", e)))
}

/// Parse a ttl such as "30s", "15m", "12h" or "90d".
pub fn parse_ttl(input: &str) -> Result<chrono::Duration, VaultError> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let amount: i64 = digits
        .parse()
        .map_err(|_| VaultError::Other(format!("Invalid ttl '{}'", input)))?;

    match unit {
        "s" => Ok(chrono::Duration::seconds(amount)),
        "m" => Ok(chrono::Duration::minutes(amount)),
        "h" => Ok(chrono::Duration::hours(amount)),
        "d" => Ok(chrono::Duration::days(amount)),
        _ => Err(VaultError::Other(format!(
            "Invalid ttl unit in '{}', use s, m, h or d",
            input
        ))),
    }
}

fn read_secret_from_stdin() -> Result<String, VaultError> {
    eprintln!("Enter secret (end with newline):");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        return Err(VaultError::Other("Secret must not be empty".to_string()));
    }
    Ok(secret)
}

// ─── Init ────────────────────────────────────────────────────────────────────

fn cmd_init(config: VaultConfig) -> Result<(), VaultError> {
    let provider = KeyringProvider::new(&config.keyring_service);
    let vault = Vault::init(config, &provider)?;

    println!("✓ Credvault initialized successfully");
    println!("  Database: {}", vault.config().database_path().display());
    println!("  Master key stored in platform keyring");
    println!();
    println!("Next: register a type with `credvault type-add API_KEY --name \"API Key\"`");

    Ok(())
}

// ─── Types ───────────────────────────────────────────────────────────────────

fn cmd_type_add(
    vault: &Vault,
    code: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
) -> Result<(), VaultError> {
    let mut draft = CredentialTypeDraft::new(code, name);
    draft.description = description;
    draft.category = category;

    let ty = vault.registry().upsert(draft)?;
    println!("✓ Credential type registered");
    println!("  ID:   {}", ty.id);
    println!("  Code: {}", ty.code);

    Ok(())
}

fn cmd_type_list(vault: &Vault) -> Result<(), VaultError> {
    let types = vault.registry().list()?;
    if types.is_empty() {
        println!("No credential types registered yet.");
        return Ok(());
    }

    println!("Credential types ({}):\n", types.len());
    for ty in &types {
        println!(
            "  {:20} │ {:30} │ {:16} │ {}",
            ty.code,
            ty.name,
            ty.category.as_deref().unwrap_or("-"),
            if ty.active { "active" } else { "inactive" },
        );
    }

    Ok(())
}

// ─── Credentials ─────────────────────────────────────────────────────────────

fn cmd_add(
    vault: &Vault,
    owner: String,
    type_code: String,
    secret: Option<String>,
    ttl: Option<String>,
    pending: bool,
) -> Result<(), VaultError> {
    let secret = zeroize::Zeroizing::new(match secret {
        Some(s) => s,
        None => read_secret_from_stdin()?,
    });

    let mut request = NewCredential::new(owner, type_code, secret.as_bytes());
    if let Some(ttl) = ttl {
        request = request.with_ttl(parse_ttl(&ttl)?);
    }
    if pending {
        request = request.pending();
    }

    let cred = vault.manager().create(request)?;
    println!("✓ Credential stored");
    println!("  ID:    {}", cred.id);
    println!("  State: {}", cred.state);
    if let Some(at) = cred.expires_at {
        println!("  Expires: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

fn cmd_access(vault: &Vault, id: &str, accessor: &str) -> Result<(), VaultError> {
    let id = parse_id(id)?;
    let report = vault.manager().access(&id, accessor);
    if let Err(e) = &report.audit {
        eprintln!("Warning: access was not audit-logged: {}", e);
    }

    let secret = report.into_result()?;
    println!("{}", String::from_utf8_lossy(&secret));
    Ok(())
}

fn cmd_confirm(vault: &Vault, id: &str, version: u64) -> Result<(), VaultError> {
    let cred = vault.manager().confirm(&parse_id(id)?, version)?;
    println!("✓ Credential {} is now {} (version {})", cred.id, cred.state, cred.version);
    Ok(())
}

fn cmd_revoke(vault: &Vault, id: &str, version: u64) -> Result<(), VaultError> {
    let cred = vault.manager().revoke(&parse_id(id)?, version)?;
    println!("✓ Credential {} revoked (version {})", cred.id, cred.version);
    Ok(())
}

fn cmd_destroy(vault: &Vault, id: &str, version: u64) -> Result<(), VaultError> {
    let cred = vault.manager().destroy(&parse_id(id)?, version)?;
    println!("✓ Credential {} destroyed, secret material purged", cred.id);
    Ok(())
}

fn cmd_delete(vault: &Vault, id: &str) -> Result<(), VaultError> {
    let id = parse_id(id)?;
    vault.manager().delete(&id)?;
    println!("✓ Credential {} deleted", id);
    Ok(())
}

fn cmd_show(vault: &Vault, id: &str) -> Result<(), VaultError> {
    let cred = vault.manager().get(&parse_id(id)?)?;
    let ty = vault.registry().get_by_id(&cred.type_id)?;

    println!("Credential details:\n");
    println!("  ID:          {}", cred.id);
    println!("  Type:        {}", ty);
    println!("  Owner:       {}", cred.owner_id);
    println!("  State:       {}", cred.state);
    println!("  Version:     {}", cred.version);
    println!("  Secret:      [REDACTED]");
    match cred.key_version() {
        Some(v) => println!("  Key version: {}", v),
        None => println!("  Key version: - (purged)"),
    }
    println!("  Created:     {}", cred.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Updated:     {}", cred.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(at) = cred.expires_at {
        println!("  Expires:     {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

fn cmd_list(vault: &Vault, owner: &str) -> Result<(), VaultError> {
    let mut count = 0;
    for item in vault.store().list_by_owner(owner) {
        let cred = item?;
        if count == 0 {
            println!("Credentials of {}:\n", owner);
        }
        println!("  {}", cred);
        count += 1;
    }

    if count == 0 {
        println!("No credentials stored for {}.", owner);
    }
    Ok(())
}

// ─── Audit ───────────────────────────────────────────────────────────────────

fn cmd_audit(
    vault: &Vault,
    id: Option<String>,
    accessor: Option<String>,
    outcome: Option<String>,
    limit: usize,
    after: Option<String>,
) -> Result<(), VaultError> {
    let filter = AccessLogFilter {
        credential_id: id.as_deref().map(parse_id).transpose()?,
        accessor_id: accessor,
        outcome: outcome
            .as_deref()
            .map(|o| o.parse::<AccessOutcome>().map_err(VaultError::Other))
            .transpose()?,
        ..AccessLogFilter::default()
    };

    let mut entries = match after {
        Some(token) => vault
            .auditor()
            .query_from(filter, AccessLogCursor::decode(&token)?),
        None => vault.auditor().query(filter),
    };

    println!("{:-<80}", "");
    let mut shown = 0;
    while shown < limit {
        let Some(entry) = entries.next() else { break };
        println!("{}", entry?);
        shown += 1;
    }
    println!("{:-<80}", "");

    if shown == 0 {
        println!("No access log entries found.");
    } else if shown == limit {
        if let Some(cursor) = entries.cursor() {
            println!("More entries may follow. Resume with --after '{}'", cursor.encode()?);
        }
    }

    Ok(())
}

// ─── Sweep ───────────────────────────────────────────────────────────────────

async fn cmd_sweep(vault: Vault, every: Option<u64>) -> Result<(), VaultError> {
    let vault = Arc::new(vault);

    let Some(seconds) = every else {
        let report = vault.manager().sweep(clock::now())?;
        print_sweep(&report);
        return Ok(());
    };

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(seconds.max(1)));
    tracing::info!(every_secs = seconds, "Sweep scheduler started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let vault = Arc::clone(&vault);
                let result = tokio::task::spawn_blocking(move || vault.manager().sweep(clock::now()))
                    .await
                    .map_err(|e| VaultError::Other(format!("Sweep task failed: {}", e)))?;
                match result {
                    Ok(report) => print_sweep(&report),
                    // Keep the scheduler alive; the next tick retries
                    Err(e) => tracing::error!(error = %e, "Sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Sweep scheduler stopped");
                return Ok(());
            }
        }
    }
}

fn print_sweep(report: &crate::lifecycle::SweepReport) {
    println!(
        "✓ Sweep: scanned {}, expired {}, destroyed {}, conflicts {}, access logs purged {}",
        report.scanned,
        report.expired,
        report.destroyed,
        report.conflicts,
        report.access_logs_purged
    );
}

// ─── Keys ────────────────────────────────────────────────────────────────────

fn cmd_rotate_key(vault: &Vault) -> Result<(), VaultError> {
    let previous = vault.keys().current_version();
    let info = vault.manager().rotate_key()?;
    println!("✓ Key rotated: version {} → {}", previous, info.version);
    println!("  Run `credvault reencrypt {}` to move existing secrets", previous);
    Ok(())
}

fn cmd_reencrypt(vault: &Vault, from_version: u32) -> Result<(), VaultError> {
    let report = vault.manager().reencrypt(from_version)?;
    println!(
        "✓ Re-encrypted {} credential(s) from key version {} to {} ({} skipped)",
        report.resealed, report.from_version, report.to_version, report.skipped
    );
    Ok(())
}

fn cmd_retire_key(vault: &Vault, version: u32) -> Result<(), VaultError> {
    let info = vault.manager().retire_key(version)?;
    println!("✓ Key version {} retired", info.version);
    Ok(())
}
