// Credvault: Store Module
//
// Credential and credential-type storage over an encrypted SQLCipher
// database. Secrets reach this module already sealed by the enclave; the
// persistence traits in `repository` are the only seam the rest of the
// crate depends on.

mod credentials;
mod db;
mod error;
mod models;
mod page;
mod registry;
mod repository;

pub(crate) use db::{opt_ts_column, parsed_column, ts_column, uuid_column};
pub use credentials::{CredentialStore, DEFAULT_PAGE_SIZE};
pub use db::Database;
pub use error::StoreError;
pub use models::{
    Credential, CredentialFilter, CredentialType, CredentialTypeDraft, DeleteMode, NewCredential,
};
pub use page::Paginated;
pub use registry::CredentialTypeRegistry;
pub use repository::{
    CredentialRepository, CredentialTypeRepository, KeyVersionRepository,
    SqliteCredentialRepository, SqliteCredentialTypeRepository, SqliteKeyVersionRepository,
};
