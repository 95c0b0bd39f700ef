// Credvault: Library root
//
// Credential lifecycle and access-audit engine. `Vault` assembles the
// enclave, store, audit and lifecycle modules over one encrypted database.

pub mod audit;
pub mod cli;
pub mod clock;
pub mod config;
pub mod enclave;
pub mod error;
pub mod lifecycle;
pub mod store;
pub mod vault;

pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use vault::Vault;
