//! Federated (OAuth2) identity resolution.
//!
//! A provider identity whose email matches a local account is linked to that
//! account and logs in as it. Otherwise the caller continues a signup flow.

use super::{
    accounts::{Account, AccountDirectory, LinkedIdentity, Role},
    error::AuthError,
    utils::{mask_email, normalize_email},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Attributes asserted by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederatedProfile {
    pub provider: String,
    pub provider_user_id: String,
    pub email: String,
    pub name: String,
}

impl FederatedProfile {
    /// Trim fields, normalize the email and reject empty values.
    /// # Errors
    /// Returns [`AuthError::InvalidRequest`] naming the first empty field.
    pub fn validated(self) -> Result<Self, AuthError> {
        let profile = Self {
            provider: self.provider.trim().to_lowercase(),
            provider_user_id: self.provider_user_id.trim().to_string(),
            email: normalize_email(&self.email),
            name: self.name.trim().to_string(),
        };
        if profile.provider.is_empty() {
            return Err(AuthError::InvalidRequest("provider is required"));
        }
        if profile.provider_user_id.is_empty() {
            return Err(AuthError::InvalidRequest("provider user id is required"));
        }
        if profile.email.is_empty() {
            return Err(AuthError::InvalidRequest("email is required"));
        }
        if profile.name.is_empty() {
            return Err(AuthError::InvalidRequest("name is required"));
        }
        Ok(profile)
    }

    #[must_use]
    pub fn linked_identity(&self) -> LinkedIdentity {
        LinkedIdentity {
            provider: self.provider.clone(),
            provider_user_id: self.provider_user_id.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FederatedSubject {
    pub account_id: Option<Uuid>,
    pub email: String,
    pub name: String,
    pub provider: String,
    pub provider_user_id: String,
    pub role: Option<Role>,
    pub authorities: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FederatedResolution {
    pub subject: FederatedSubject,
    pub is_new_account: bool,
}

/// Pure decision: which flow a provider profile continues with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkDecision {
    ExistingAccount(Account),
    NewAccount,
}

#[must_use]
pub fn decide(existing: Option<Account>) -> LinkDecision {
    existing.map_or(LinkDecision::NewAccount, LinkDecision::ExistingAccount)
}

/// Build the resolution for a decision; the existing account's name and
/// role take precedence over the provider's.
#[must_use]
pub fn resolution(profile: &FederatedProfile, decision: &LinkDecision) -> FederatedResolution {
    match decision {
        LinkDecision::ExistingAccount(account) => FederatedResolution {
            subject: FederatedSubject {
                account_id: Some(account.id),
                email: account.email.clone(),
                name: account.display_name.clone(),
                provider: profile.provider.clone(),
                provider_user_id: profile.provider_user_id.clone(),
                role: Some(account.role),
                authorities: vec![account.role.authority()],
            },
            is_new_account: false,
        },
        LinkDecision::NewAccount => FederatedResolution {
            subject: FederatedSubject {
                account_id: None,
                email: profile.email.clone(),
                name: profile.name.clone(),
                provider: profile.provider.clone(),
                provider_user_id: profile.provider_user_id.clone(),
                role: None,
                authorities: Vec::new(),
            },
            is_new_account: true,
        },
    }
}

pub struct AccountLinker {
    accounts: Arc<dyn AccountDirectory>,
}

impl AccountLinker {
    #[must_use]
    pub fn new(accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { accounts }
    }

    /// Resolve a provider login, linking the identity to an existing account
    /// with the same email. Linking is idempotent.
    /// # Errors
    /// [`AuthError::InvalidRequest`] for incomplete profiles,
    /// [`AuthError::Unavailable`] if the directory fails.
    #[instrument(skip(self, profile), fields(provider = %profile.provider))]
    pub async fn resolve(&self, profile: FederatedProfile) -> Result<FederatedResolution, AuthError> {
        let profile = profile.validated()?;

        let existing = self
            .accounts
            .find_by_email(&profile.email)
            .await
            .map_err(|err| {
                error!("Account lookup failed during federated login: {err:#}");
                AuthError::Unavailable
            })?;

        let decision = decide(existing);

        if let LinkDecision::ExistingAccount(account) = &decision {
            let identity = profile.linked_identity();
            if !account.is_linked(&identity) {
                self.accounts
                    .link_identity(account.id, &identity)
                    .await
                    .map_err(|err| {
                        error!("Failed to link federated identity: {err:#}");
                        AuthError::Unavailable
                    })?;
                info!(
                    "Linked {} identity to existing account {}",
                    profile.provider,
                    mask_email(&account.email)
                );
            }
        }

        Ok(resolution(&profile, &decision))
    }
}
