use super::{Account, AccountDirectory, LinkedIdentity, NewAccount, Role};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process directory for single-node runs and tests.
#[derive(Debug, Default)]
pub struct MemoryAccounts {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl MemoryAccounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }

    /// Profile change; callers are responsible for evicting cached claims.
    /// # Errors
    /// Fails if the account does not exist.
    pub async fn update_profile(&self, id: Uuid, role: Role, display_name: &str) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&id)
            .ok_or_else(|| anyhow!("account {id} not found"))?;
        account.role = role;
        account.display_name = display_name.to_string();
        Ok(())
    }

    pub async fn set_verified(&self, id: Uuid, verified: bool) {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.verified = verified;
        }
    }
}

#[async_trait]
impl AccountDirectory for MemoryAccounts {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .await
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn link_identity(&self, account_id: Uuid, identity: &LinkedIdentity) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or_else(|| anyhow!("account {account_id} not found"))?;
        if !account.is_linked(identity) {
            account.linked_identities.push(identity.clone());
        }
        Ok(())
    }

    async fn create(&self, new: NewAccount) -> Result<Account> {
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|account| account.email == new.email) {
            return Err(anyhow!("account with this email already exists"));
        }
        let account = Account {
            id: Uuid::now_v7(),
            email: new.email,
            display_name: new.display_name,
            role: new.role,
            verified: new.verified,
            password_hash: new.password_hash,
            phone: new.phone,
            linked_identities: new.linked_identity.into_iter().collect(),
        };
        accounts.insert(account.id, account.clone());
        Ok(account)
    }
}
