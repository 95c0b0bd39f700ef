// Credvault: Credential state machine
//
//   PENDING ──► ACTIVE ──► EXPIRED ──┐
//      │           └─────► REVOKED ──┴──► DESTROYED
//      └──────────────────────────────────► DESTROYED (grace window elapsed)
//
// DESTROYED is terminal. Any edge not drawn above is an invalid transition.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialState {
    /// Created, awaiting confirmation.
    Pending,
    Active,
    Expired,
    Revoked,
    /// Secret material purged. Audit trail retained.
    Destroyed,
}

impl CredentialState {
    pub const ALL: [CredentialState; 5] = [
        CredentialState::Pending,
        CredentialState::Active,
        CredentialState::Expired,
        CredentialState::Revoked,
        CredentialState::Destroyed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialState::Pending => "PENDING",
            CredentialState::Active => "ACTIVE",
            CredentialState::Expired => "EXPIRED",
            CredentialState::Revoked => "REVOKED",
            CredentialState::Destroyed => "DESTROYED",
        }
    }

    /// Whether the edge `self -> next` exists.
    pub fn can_transition_to(self, next: CredentialState) -> bool {
        use CredentialState::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Destroyed)
                | (Active, Expired)
                | (Active, Revoked)
                | (Expired, Destroyed)
                | (Revoked, Destroyed)
        )
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown credential state '{}'", s))
    }
}
