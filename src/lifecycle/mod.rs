// Credvault: Lifecycle Module
//
// The credential state machine and the manager that enforces it, gates
// secret access, and drives key rotation.

mod manager;
mod state;

pub use manager::{
    AccessReport, CredentialLifecycleManager, DenyReason, LifecyclePolicy, ReencryptReport,
    SweepReport,
};
pub use state::CredentialState;
