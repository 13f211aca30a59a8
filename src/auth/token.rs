//! Signed access/refresh tokens (HS256 JWT).
//!
//! Claims are minimal: `sub` is the account email, `uid` the account id,
//! `typ` the token kind and `jti` a random identifier used for revocation.
//! Raw tokens are never stored; [`token_hash`] is the store key.

use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, time::Duration};
use tracing::warn;
use uuid::Uuid;

const MIN_SECRET_LENGTH: usize = 32;
const SAMPLE_SECRET: &str = "your-super-super-long-and-secure-secret-key-for-jwt-hs256";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub uid: Uuid,
    pub typ: TokenKind,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl TokenClaims {
    /// Time the token still verifies for, zero once expired.
    ///
    /// A token is accepted through the whole second `exp`, so this rounds
    /// up and is at least one second while `exp >= now`.
    #[must_use]
    pub fn remaining_lifetime(&self, now: i64) -> Duration {
        Duration::from_secs(u64::try_from(self.exp - now + 1).unwrap_or(0))
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token malformed or signature invalid")]
    Malformed,
    #[error("expected {expected} token, got {actual}")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },
    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("JWT secret is required")]
    Missing,
    #[error("JWT secret must be at least {MIN_SECRET_LENGTH} characters, got {0}")]
    TooShort(usize),
    #[error("JWT secret is the published sample value, generate a new one")]
    SampleSecret,
}

/// Reject unusable signing secrets; weak but acceptable ones only warn.
/// # Errors
/// Returns [`KeyError`] if the secret is missing, too short or the sample value.
pub fn validate_secret(secret: &str) -> Result<(), KeyError> {
    let secret = secret.trim();
    if secret.is_empty() {
        return Err(KeyError::Missing);
    }
    let length = secret.chars().count();
    if length < MIN_SECRET_LENGTH {
        return Err(KeyError::TooShort(length));
    }
    if secret == SAMPLE_SECRET {
        return Err(KeyError::SampleSecret);
    }
    if has_weak_pattern(secret) {
        warn!("JWT secret contains repeated or sequential characters, consider a random key");
    }
    Ok(())
}

fn has_weak_pattern(secret: &str) -> bool {
    let chars: Vec<char> = secret.chars().collect();
    chars.windows(4).any(|w| {
        let repeated = w.iter().all(|c| *c == w[0]);
        let ascending = w
            .windows(2)
            .all(|pair| u32::from(pair[1]) == u32::from(pair[0]) + 1);
        repeated || ascending
    })
}

/// Stable store key for a token: base64url(SHA-256(token)).
#[must_use]
pub fn token_hash(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

#[must_use]
pub fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    /// # Errors
    /// Returns [`KeyError`] if the secret fails validation.
    pub fn new(
        secret: &SecretString,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, KeyError> {
        let secret = secret.expose_secret();
        validate_secret(secret)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
            refresh_ttl,
        })
    }

    #[must_use]
    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    /// # Errors
    /// Returns [`TokenError::Encode`] if signing fails.
    pub fn issue(
        &self,
        subject_id: Uuid,
        identity: &str,
        kind: TokenKind,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_with_ttl(subject_id, identity, kind, self.ttl(kind))
    }

    /// # Errors
    /// Returns [`TokenError::Encode`] if signing fails.
    pub fn issue_with_ttl(
        &self,
        subject_id: Uuid,
        identity: &str,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let iat = now_seconds();
        let claims = TokenClaims {
            sub: identity.to_string(),
            uid: subject_id,
            typ: kind,
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Encode)?;
        Ok(IssuedToken { token, claims })
    }

    /// Verify signature and expiry.
    /// # Errors
    /// Returns [`TokenError::Expired`] or [`TokenError::Malformed`].
    pub fn parse(&self, token: &str) -> Result<TokenClaims, TokenError> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })
    }

    /// Like [`TokenCodec::parse`] but also checks the token kind.
    /// # Errors
    /// Returns [`TokenError::WrongKind`] when the kind differs.
    pub fn parse_kind(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError> {
        let claims = self.parse(token)?;
        if claims.typ != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: claims.typ,
            });
        }
        Ok(claims)
    }
}
