//! Refresh sessions: one live refresh token per account.
//!
//! Layout in the store:
//! - `refresh:<tokenHash>` → account id, TTL = refresh lifetime
//! - `sessions:<accountId>` → set of token hashes
//! - `access:<accountId>` → set of access-token jtis, TTL = access lifetime
//!
//! Rotation claims the old session with an atomic take, so two concurrent
//! rotations of the same token can never both succeed.

use super::{
    accounts::{AccountDirectory, Subject},
    blacklist::TokenBlacklist,
    error::AuthError,
    kv::{KeyValueStore, StoreError},
    token::{now_seconds, token_hash, TokenClaims, TokenCodec, TokenKind},
    utils::mask_user_id,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

fn refresh_key(hash: &str) -> String {
    format!("refresh:{hash}")
}

fn sessions_key(subject_id: Uuid) -> String {
    format!("sessions:{subject_id}")
}

fn access_key(subject_id: Uuid) -> String {
    format!("access:{subject_id}")
}

fn unavailable(context: &str, err: &StoreError) -> AuthError {
    error!("{context}: {err}");
    AuthError::Unavailable
}

pub struct RefreshTokenStore {
    store: Arc<dyn KeyValueStore>,
    codec: Arc<TokenCodec>,
    blacklist: Arc<TokenBlacklist>,
    accounts: Arc<dyn AccountDirectory>,
}

impl RefreshTokenStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        codec: Arc<TokenCodec>,
        blacklist: Arc<TokenBlacklist>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        Self {
            store,
            codec,
            blacklist,
            accounts,
        }
    }

    /// Start a new session for `subject`, ending every previous one.
    /// # Errors
    /// Returns [`AuthError::Unavailable`] if the session cannot be recorded.
    #[instrument(skip(self, subject), fields(subject = %mask_user_id(&subject.id.to_string())))]
    pub async fn issue(&self, subject: &Subject) -> Result<TokenPair, AuthError> {
        self.mint_pair(subject).await
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// consumed whether or not the exchange completes.
    /// # Errors
    /// [`AuthError::InvalidToken`] for unknown, reused, revoked or foreign
    /// tokens; [`AuthError::Unavailable`] when the store cannot be reached.
    #[instrument(skip(self, refresh_token))]
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self
            .codec
            .parse_kind(refresh_token, TokenKind::Refresh)
            .map_err(|err| {
                debug!("Rejected refresh token: {err}");
                AuthError::InvalidToken
            })?;

        if self.blacklist.is_jti_revoked(&claims.jti).await {
            debug!("Refresh token is blacklisted");
            return Err(AuthError::InvalidToken);
        }

        let hash = token_hash(refresh_token);
        let owner = self
            .store
            .take(&refresh_key(&hash))
            .await
            .map_err(|err| unavailable("Failed to claim refresh session", &err))?;

        let Some(owner) = owner else {
            warn!(
                "Refresh token for {} is not active, possible reuse",
                mask_user_id(&claims.uid.to_string())
            );
            return Err(AuthError::InvalidToken);
        };

        if owner != claims.uid.to_string() {
            error!(
                "Refresh session owner mismatch for {}",
                mask_user_id(&claims.uid.to_string())
            );
            return Err(AuthError::InvalidToken);
        }

        self.retire(&claims, &hash).await;

        let account = match self.accounts.find_by_id(claims.uid).await {
            Ok(Some(account)) if account.verified => account,
            Ok(_) => {
                warn!(
                    "Refresh denied, account {} missing or unverified",
                    mask_user_id(&claims.uid.to_string())
                );
                return Err(AuthError::InvalidToken);
            }
            Err(err) => {
                error!("Account lookup failed during refresh: {err:#}");
                return Err(AuthError::Unavailable);
            }
        };

        if account.email != claims.sub {
            // Email changed since issue; the new pair carries the current one.
            info!(
                "Account {} email changed since token issue",
                mask_user_id(&account.id.to_string())
            );
        }

        self.mint_pair(&Subject::from(&account)).await
    }

    /// `true` if the refresh token is still the live session token.
    pub async fn is_active(&self, refresh_token: &str) -> bool {
        if self
            .codec
            .parse_kind(refresh_token, TokenKind::Refresh)
            .is_err()
        {
            return false;
        }
        self.store
            .exists(&refresh_key(&token_hash(refresh_token)))
            .await
            .unwrap_or(false)
    }

    /// End the session of one refresh token. Failures are logged only.
    #[instrument(skip(self, refresh_token))]
    pub async fn revoke(&self, refresh_token: &str) {
        let hash = token_hash(refresh_token);
        let key = refresh_key(&hash);

        let owner = match self.store.take(&key).await {
            Ok(owner) => owner,
            Err(err) => {
                error!("Failed to revoke refresh session: {err}");
                return;
            }
        };

        let Some(owner) = owner else {
            debug!("Refresh session already gone");
            return;
        };

        match owner.parse::<Uuid>() {
            Ok(subject_id) => {
                if let Err(err) = self.store.set_remove(&sessions_key(subject_id), &hash).await {
                    warn!("Failed to update session index: {err}");
                }
            }
            Err(_) => warn!("Refresh session has an invalid owner id"),
        }
    }

    /// End every refresh session of `subject_id`. Failures are logged only.
    #[instrument(skip(self), fields(subject = %mask_user_id(&subject_id.to_string())))]
    pub async fn revoke_all(&self, subject_id: Uuid) {
        let index = sessions_key(subject_id);
        let hashes = match self.store.set_members(&index).await {
            Ok(hashes) => hashes,
            Err(err) => {
                error!("Failed to list refresh sessions: {err}");
                return;
            }
        };

        for hash in &hashes {
            if let Err(err) = self.store.delete(&refresh_key(hash)).await {
                error!("Failed to delete refresh session: {err}");
            }
        }

        if let Err(err) = self.store.delete(&index).await {
            error!("Failed to delete session index: {err}");
        }

        if !hashes.is_empty() {
            debug!("Revoked {} refresh session(s)", hashes.len());
        }
    }

    /// Blacklist every tracked access token of `subject_id`.
    pub async fn revoke_access_tokens(&self, subject_id: Uuid) {
        let index = access_key(subject_id);
        let jtis = match self.store.set_members(&index).await {
            Ok(jtis) => jtis,
            Err(err) => {
                error!("Failed to list access tokens: {err}");
                return;
            }
        };

        let ttl = self.codec.ttl(TokenKind::Access);
        for jti in &jtis {
            if let Err(err) = self.blacklist.revoke_jti(jti, ttl).await {
                error!("Failed to blacklist access token: {err}");
            }
        }

        if let Err(err) = self.store.delete(&index).await {
            error!("Failed to delete access token index: {err}");
        }
    }

    /// Delete every indexed session of `subject_id` except `keep`.
    ///
    /// Runs after the new session is written, so concurrent logins converge
    /// on at most one survivor.
    async fn end_other_sessions(&self, subject_id: Uuid, keep: &str) {
        let index = sessions_key(subject_id);
        let hashes = match self.store.set_members(&index).await {
            Ok(hashes) => hashes,
            Err(err) => {
                error!("Failed to list refresh sessions: {err}");
                return;
            }
        };

        for hash in hashes.iter().filter(|hash| hash.as_str() != keep) {
            if let Err(err) = self.store.delete(&refresh_key(hash)).await {
                error!("Failed to delete previous refresh session: {err}");
                continue;
            }
            if let Err(err) = self.store.set_remove(&index, hash).await {
                warn!("Failed to update session index: {err}");
            }
        }
    }

    /// Drop the rotated-out session from the index and blacklist its jti.
    async fn retire(&self, claims: &TokenClaims, hash: &str) {
        if let Err(err) = self.store.set_remove(&sessions_key(claims.uid), hash).await {
            warn!("Failed to update session index: {err}");
        }
        let remaining = claims.remaining_lifetime(now_seconds());
        if let Err(err) = self.blacklist.revoke_jti(&claims.jti, remaining).await {
            warn!("Failed to blacklist rotated refresh token: {err}");
        }
    }

    async fn mint_pair(&self, subject: &Subject) -> Result<TokenPair, AuthError> {
        let issue = |kind| {
            self.codec.issue(subject.id, &subject.email, kind).map_err(|err| {
                error!("Failed to sign {kind} token: {err}");
                AuthError::Unavailable
            })
        };
        let access = issue(TokenKind::Access)?;
        let refresh = issue(TokenKind::Refresh)?;

        let hash = token_hash(&refresh.token);
        let refresh_ttl = self.codec.ttl(TokenKind::Refresh);
        let access_ttl = self.codec.ttl(TokenKind::Access);
        let index = sessions_key(subject.id);

        self.store
            .set_ex(&refresh_key(&hash), &subject.id.to_string(), refresh_ttl)
            .await
            .map_err(|err| unavailable("Failed to store refresh session", &err))?;
        self.store
            .set_add(&index, &hash)
            .await
            .map_err(|err| unavailable("Failed to index refresh session", &err))?;
        self.store
            .expire(&index, refresh_ttl)
            .await
            .map_err(|err| unavailable("Failed to set session index expiry", &err))?;

        self.end_other_sessions(subject.id, &hash).await;

        let access_index = access_key(subject.id);
        let tracked = async {
            self.store.set_add(&access_index, &access.claims.jti).await?;
            self.store.expire(&access_index, access_ttl).await
        };
        if let Err(err) = tracked.await {
            warn!("Failed to track access token: {err}");
        }

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer",
            expires_in: access_ttl.as_secs(),
        })
    }
}
