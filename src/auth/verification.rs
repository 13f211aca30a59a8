//! One-time email verification codes.
//!
//! A code lives under `verify:<email>` until it expires or is redeemed.
//! Redeeming compares and deletes in one store step, so a code is accepted
//! at most once; a wrong guess leaves it in place.

use super::{error::AuthError, kv::KeyValueStore, utils::mask_email};
use rand::{rngs::OsRng, Rng};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

const KEY_PREFIX: &str = "verify:";
const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

fn key(email: &str) -> String {
    format!("{KEY_PREFIX}{email}")
}

pub struct VerificationCodes {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl VerificationCodes {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Store a fresh six digit code for `email`, replacing any earlier one.
    /// # Errors
    /// [`AuthError::Unavailable`] if the store write fails.
    pub async fn issue(&self, email: &str) -> Result<SecretString, AuthError> {
        let code = OsRng.gen_range(CODE_MIN..=CODE_MAX).to_string();
        self.store
            .set_ex(&key(email), &code, self.ttl)
            .await
            .map_err(|err| {
                error!("Failed to store verification code: {err}");
                AuthError::Unavailable
            })?;
        info!("Issued verification code for {}", mask_email(email));
        Ok(SecretString::from(code))
    }

    /// Accept `code` once.
    /// # Errors
    /// [`AuthError::InvalidVerificationCode`] when it is wrong, expired or
    /// already used, [`AuthError::Unavailable`] if the store cannot answer.
    pub async fn redeem(&self, email: &str, code: &SecretString) -> Result<(), AuthError> {
        let code = code.expose_secret().trim();
        if code.is_empty() {
            return Err(AuthError::InvalidVerificationCode);
        }
        match self.store.take_if_equal(&key(email), code).await {
            Ok(true) => {
                info!("Verification code accepted for {}", mask_email(email));
                Ok(())
            }
            Ok(false) => {
                warn!("Verification code mismatch or expired for {}", mask_email(email));
                Err(AuthError::InvalidVerificationCode)
            }
            Err(err) => {
                error!("Verification code lookup failed: {err}");
                Err(AuthError::Unavailable)
            }
        }
    }
}
