//! Account directory consulted by the auth subsystem.
//!
//! The directory owns account records; this crate only reads them, links
//! federated identities and creates accounts on federated signup.

mod memory;
mod postgres;

pub use self::memory::MemoryAccounts;
pub use self::postgres::PgAccounts;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }

    /// Authority string handed to downstream authorization, e.g. `ROLE_USER`.
    #[must_use]
    pub fn authority(self) -> String {
        format!("ROLE_{}", self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "USER" => Ok(Self::User),
            "ADMIN" => Ok(Self::Admin),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIdentity {
    pub provider: String,
    pub provider_user_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub verified: bool,
    /// Argon2 PHC string; `None` for accounts without local credentials.
    pub password_hash: Option<String>,
    pub phone: Option<String>,
    pub linked_identities: Vec<LinkedIdentity>,
}

impl Account {
    #[must_use]
    pub fn is_linked(&self, identity: &LinkedIdentity) -> bool {
        self.linked_identities.contains(identity)
    }
}

/// The token-bearing view of an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    pub id: Uuid,
    pub email: String,
}

impl From<&Account> for Subject {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewAccount {
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub verified: bool,
    pub password_hash: Option<String>,
    pub phone: Option<String>,
    pub linked_identity: Option<LinkedIdentity>,
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Lookup by normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    /// Attach a federated identity. Linking an already linked identity is a no-op.
    async fn link_identity(&self, account_id: Uuid, identity: &LinkedIdentity) -> Result<()>;

    /// # Errors
    /// Fails if an account with the same email already exists.
    async fn create(&self, account: NewAccount) -> Result<Account>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_strings() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::Admin.authority(), "ROLE_ADMIN");
    }
}
