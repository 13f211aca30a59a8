//! Revoked token identifiers.
//!
//! Entries live exactly as long as the token they revoke. Lookups are
//! fail-safe: if the store cannot answer, the token is treated as revoked.

use super::{
    kv::{KeyValueStore, StoreError},
    token::{now_seconds, TokenCodec, TokenError},
    utils::mask_token,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, instrument, warn};

const KEY_PREFIX: &str = "blacklist:";
const MARKER: &str = "revoked";

#[derive(Debug, thiserror::Error)]
pub enum BlacklistError {
    #[error("cannot revoke token: {0}")]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TokenBlacklist {
    store: Arc<dyn KeyValueStore>,
    codec: Arc<TokenCodec>,
}

fn key(jti: &str) -> String {
    format!("{KEY_PREFIX}{jti}")
}

impl TokenBlacklist {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, codec: Arc<TokenCodec>) -> Self {
        Self { store, codec }
    }

    /// Revoke a token for at most `ttl`, capped at its remaining lifetime.
    ///
    /// A token that has already expired is not stored.
    /// # Errors
    /// Fails if the token cannot be parsed or the store write fails.
    #[instrument(skip(self, token))]
    pub async fn revoke(&self, token: &str, ttl: Duration) -> Result<(), BlacklistError> {
        let claims = match self.codec.parse(token) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => {
                debug!("Token already expired, nothing to revoke");
                return Ok(());
            }
            Err(err) => {
                warn!("Refusing to revoke unparsable token {}", mask_token(token));
                return Err(err.into());
            }
        };

        let ttl = ttl.min(claims.remaining_lifetime(now_seconds()));
        self.revoke_jti(&claims.jti, ttl).await?;
        Ok(())
    }

    /// # Errors
    /// Fails if the store write fails.
    pub async fn revoke_jti(&self, jti: &str, ttl: Duration) -> Result<(), StoreError> {
        if ttl.is_zero() {
            debug!("Skipping revocation with no remaining lifetime");
            return Ok(());
        }
        self.store.set_ex(&key(jti), MARKER, ttl).await
    }

    /// `true` when the token is revoked, unreadable, or the store is unreachable.
    pub async fn is_revoked(&self, token: &str) -> bool {
        match self.codec.parse(token) {
            Ok(claims) => self.is_jti_revoked(&claims.jti).await,
            Err(err) => {
                debug!("Treating unparsable token as revoked: {err}");
                true
            }
        }
    }

    pub async fn is_jti_revoked(&self, jti: &str) -> bool {
        match self.store.exists(&key(jti)).await {
            Ok(revoked) => revoked,
            Err(err) => {
                error!("Blacklist lookup failed, treating token as revoked: {err}");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{kv::MemoryStore, token::tests::codec, token::TokenKind};
    use uuid::Uuid;

    fn blacklist() -> (Arc<MemoryStore>, Arc<TokenCodec>, TokenBlacklist) {
        let store = Arc::new(MemoryStore::new());
        let codec = Arc::new(codec());
        let blacklist = TokenBlacklist::new(store.clone(), codec.clone());
        (store, codec, blacklist)
    }

    #[tokio::test]
    async fn revoked_token_is_reported() {
        let (_, codec, blacklist) = blacklist();
        let issued = codec
            .issue(Uuid::new_v4(), "a@x.com", TokenKind::Access)
            .unwrap();
        assert!(!blacklist.is_revoked(&issued.token).await);
        blacklist
            .revoke(&issued.token, Duration::from_secs(900))
            .await
            .unwrap();
        assert!(blacklist.is_revoked(&issued.token).await);
        assert!(blacklist.is_jti_revoked(&issued.claims.jti).await);
    }

    #[tokio::test]
    async fn ttl_never_exceeds_token_lifetime() {
        let (store, codec, blacklist) = blacklist();
        let issued = codec
            .issue_with_ttl(
                Uuid::new_v4(),
                "a@x.com",
                TokenKind::Access,
                Duration::from_secs(30),
            )
            .unwrap();
        blacklist
            .revoke(&issued.token, Duration::from_secs(3600))
            .await
            .unwrap();
        let ttl = store.ttl(&key(&issued.claims.jti)).unwrap();
        assert!(ttl <= Duration::from_secs(31));
    }

    #[tokio::test]
    async fn token_in_its_last_second_is_still_revoked() {
        let (store, codec, blacklist) = blacklist();
        // start early in a second so the whole test runs inside it
        let millis = u64::from(chrono::Utc::now().timestamp_subsec_millis());
        if millis > 300 {
            tokio::time::sleep(Duration::from_millis(1010 - millis)).await;
        }
        let issued = codec
            .issue_with_ttl(Uuid::new_v4(), "a@x.com", TokenKind::Access, Duration::ZERO)
            .unwrap();
        // exp == iat still verifies
        assert!(codec.parse(&issued.token).is_ok());
        blacklist
            .revoke(&issued.token, Duration::from_secs(900))
            .await
            .unwrap();
        assert!(store.ttl(&key(&issued.claims.jti)).is_some());
        assert!(blacklist.is_revoked(&issued.token).await);
    }

    #[tokio::test]
    async fn malformed_token_cannot_be_revoked() {
        let (_, _, blacklist) = blacklist();
        assert!(matches!(
            blacklist.revoke("garbage", Duration::from_secs(60)).await,
            Err(BlacklistError::Token(TokenError::Malformed))
        ));
    }

    #[tokio::test]
    async fn lookup_fails_safe_when_store_is_down() {
        let (store, codec, blacklist) = blacklist();
        let issued = codec
            .issue(Uuid::new_v4(), "a@x.com", TokenKind::Access)
            .unwrap();
        store.set_available(false);
        assert!(blacklist.is_revoked(&issued.token).await);
        assert!(blacklist.is_jti_revoked("anything").await);
        assert!(blacklist.is_revoked("garbage").await);
    }

    #[tokio::test]
    async fn revoke_surfaces_store_failure() {
        let (store, codec, blacklist) = blacklist();
        let issued = codec
            .issue(Uuid::new_v4(), "a@x.com", TokenKind::Access)
            .unwrap();
        store.set_available(false);
        assert!(matches!(
            blacklist.revoke(&issued.token, Duration::from_secs(60)).await,
            Err(BlacklistError::Store(_))
        ));
    }
}
