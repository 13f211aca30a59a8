//! Token claims enriched with current account attributes.
//!
//! Role and display name are cached in the shared store under
//! `claims:<email>:<account id>`, so an eviction on one instance is seen by
//! all of them. Entries also expire after the configured TTL, which bounds
//! staleness when an eviction is missed. If the store cannot answer, profiles
//! are read straight from the directory.

use super::{
    accounts::{AccountDirectory, Role},
    error::AuthError,
    kv::KeyValueStore,
    token::{TokenClaims, TokenKind},
    utils::{mask_email, mask_user_id},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{future::Future, marker::PhantomData, sync::Arc, time::Duration};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnrichedClaims {
    pub subject_id: Uuid,
    pub email: String,
    pub token_kind: TokenKind,
    pub jti: String,
    pub expires_at: i64,
    pub role: Role,
    pub display_name: String,
    pub authorities: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub role: Role,
    pub display_name: String,
}

/// Get-or-compute cache over the shared store.
///
/// Values are JSON under `<namespace>:<key>`; every key written is also
/// recorded in `<namespace>:index` so [`Cache::evict_all`] can find it.
/// Store failures degrade to computing every time. Concurrent misses may
/// compute twice and the last write wins.
pub struct Cache<V> {
    namespace: &'static str,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    _value: PhantomData<fn() -> V>,
}

impl<V: Serialize + DeserializeOwned> Cache<V> {
    #[must_use]
    pub fn new(namespace: &'static str, store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            namespace,
            store,
            ttl,
            _value: PhantomData,
        }
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.namespace)
    }

    /// # Errors
    /// Propagates the error from `compute`; nothing is cached in that case.
    pub async fn get_or_compute<E, F, Fut>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let entry = self.entry_key(key);
        match self.store.get(&entry).await {
            Ok(Some(value)) => match serde_json::from_str(&value) {
                Ok(value) => return Ok(value),
                Err(err) => warn!("Discarding unreadable {} entry: {err}", self.namespace),
            },
            Ok(None) => {}
            Err(err) => debug!("{} cache unavailable, computing: {err}", self.namespace),
        }

        let value = compute().await?;
        self.put(&entry, &value).await;
        Ok(value)
    }

    async fn put(&self, entry: &str, value: &V) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                error!("Failed to encode {} entry: {err}", self.namespace);
                return;
            }
        };
        let index = self.index_key();
        let written = async {
            self.store.set_ex(entry, &encoded, self.ttl).await?;
            self.store.set_add(&index, entry).await?;
            self.store.expire(&index, self.ttl).await
        };
        if let Err(err) = written.await {
            debug!("{} entry not cached: {err}", self.namespace);
        }
    }

    /// If the store is down the entry stays until its TTL runs out.
    pub async fn evict(&self, key: &str) {
        let entry = self.entry_key(key);
        if let Err(err) = self.store.delete(&entry).await {
            error!(
                "Failed to evict {} entry, stale for up to {:?}: {err}",
                self.namespace, self.ttl
            );
            return;
        }
        if let Err(err) = self.store.set_remove(&self.index_key(), &entry).await {
            warn!("Failed to update {} index: {err}", self.namespace);
        }
    }

    pub async fn evict_all(&self) {
        let index = self.index_key();
        let entries = match self.store.set_members(&index).await {
            Ok(entries) => entries,
            Err(err) => {
                error!("Failed to list {} entries: {err}", self.namespace);
                return;
            }
        };
        for entry in &entries {
            if let Err(err) = self.store.delete(entry).await {
                error!("Failed to evict {} entry: {err}", self.namespace);
            }
        }
        if let Err(err) = self.store.delete(&index).await {
            warn!("Failed to delete {} index: {err}", self.namespace);
        }
        debug!("Evicted {} {} entries", entries.len(), self.namespace);
    }
}

fn profile_key(email: &str, subject_id: Uuid) -> String {
    format!("{email}:{subject_id}")
}

pub struct ClaimsEnricher {
    accounts: Arc<dyn AccountDirectory>,
    cache: Cache<Profile>,
}

impl ClaimsEnricher {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        store: Arc<dyn KeyValueStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            accounts,
            cache: Cache::new("claims", store, ttl),
        }
    }

    /// # Errors
    /// [`AuthError::InvalidToken`] if the account no longer exists,
    /// [`AuthError::AccountMismatch`] if the email now belongs to another id,
    /// [`AuthError::Unavailable`] if the directory lookup fails.
    pub async fn enrich(&self, claims: &TokenClaims) -> Result<EnrichedClaims, AuthError> {
        let key = profile_key(&claims.sub, claims.uid);
        let profile = self
            .cache
            .get_or_compute(&key, || self.load_profile(&claims.sub, claims.uid))
            .await?;

        Ok(EnrichedClaims {
            subject_id: claims.uid,
            email: claims.sub.clone(),
            token_kind: claims.typ,
            jti: claims.jti.clone(),
            expires_at: claims.exp,
            authorities: vec![profile.role.authority()],
            role: profile.role,
            display_name: profile.display_name,
        })
    }

    async fn load_profile(&self, email: &str, subject_id: Uuid) -> Result<Profile, AuthError> {
        debug!("Loading claims profile for {}", mask_email(email));
        let account = match self.accounts.find_by_email(email).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!("Token subject {} no longer exists", mask_email(email));
                return Err(AuthError::InvalidToken);
            }
            Err(err) => {
                error!("Account lookup failed while enriching claims: {err:#}");
                return Err(AuthError::Unavailable);
            }
        };

        if account.id != subject_id {
            warn!(
                "Token account id {} does not match account {}",
                mask_user_id(&subject_id.to_string()),
                mask_user_id(&account.id.to_string())
            );
            return Err(AuthError::AccountMismatch);
        }

        Ok(Profile {
            role: account.role,
            display_name: account.display_name,
        })
    }

    /// Drop the cached profile of one account after it changes.
    pub async fn evict(&self, email: &str, subject_id: Uuid) {
        self.cache.evict(&profile_key(email, subject_id)).await;
    }

    pub async fn evict_all(&self) {
        self.cache.evict_all().await;
    }
}
