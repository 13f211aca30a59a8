//! Password verification with a timing floor.
//!
//! Every attempt runs exactly one Argon2 verification: against the account's
//! stored hash when it exists, otherwise against a dummy hash generated at
//! startup with the same parameters. Failures are then padded to a minimum
//! duration so unknown and known accounts are indistinguishable by latency.

use super::{
    accounts::{Account, AccountDirectory},
    error::AuthError,
    utils::mask_email,
};
use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, error, instrument};

/// Per-call timing context; replaces any ambient per-thread state.
#[derive(Debug, Clone, Copy)]
pub struct TimingGuard {
    started: Instant,
    floor: Duration,
}

impl TimingGuard {
    #[must_use]
    pub fn start(floor: Duration) -> Self {
        Self {
            started: Instant::now(),
            floor,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sleep until at least `floor` has passed since `start`.
    pub async fn pad(&self) {
        tokio::time::sleep_until(self.started + self.floor).await;
    }
}

/// Hash a secret with Argon2id and the given parameters.
/// # Errors
/// Fails if the parameters are rejected by Argon2.
pub fn hash_secret(secret: &str, params: &Params) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params.clone(),
    );
    let hash = argon2
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash secret"))?
        .to_string();
    Ok(hash)
}

async fn verify_hash(hash: String, secret: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|_| anyhow!("invalid password hash"))?;
        // Parameters come from the PHC string.
        Ok(Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .context("password verification task failed")?
}

pub struct CredentialVerifier {
    accounts: Arc<dyn AccountDirectory>,
    dummy_hash: String,
    min_failure_response: Duration,
}

impl CredentialVerifier {
    /// # Errors
    /// Fails if the dummy hash cannot be generated with `params`.
    pub fn new(
        accounts: Arc<dyn AccountDirectory>,
        params: &Params,
        min_failure_response: Duration,
    ) -> Result<Self> {
        let throwaway: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let dummy_hash = hash_secret(&throwaway, params).context("failed to build dummy hash")?;

        Ok(Self {
            accounts,
            dummy_hash,
            min_failure_response,
        })
    }

    #[must_use]
    pub fn min_failure_response(&self) -> Duration {
        self.min_failure_response
    }

    /// Verify `email`/`secret`. Every failure is the same
    /// [`AuthError::InvalidCredentials`], returned no sooner than the
    /// configured minimum.
    /// # Errors
    /// Returns [`AuthError::InvalidCredentials`] on any failure.
    #[instrument(skip(self, email, secret))]
    pub async fn authenticate(&self, email: &str, secret: &SecretString) -> Result<Account, AuthError> {
        let guard = TimingGuard::start(self.min_failure_response);

        match self.attempt(email, secret).await {
            Ok(Some(account)) => Ok(account),
            Ok(None) => {
                debug!("Authentication failed for {}", mask_email(email));
                guard.pad().await;
                Err(AuthError::InvalidCredentials)
            }
            Err(err) => {
                error!("Authentication error for {}: {err:#}", mask_email(email));
                guard.pad().await;
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    async fn attempt(&self, email: &str, secret: &SecretString) -> Result<Option<Account>> {
        let account = self.accounts.find_by_email(email).await?;

        let (hash, candidate) = match account {
            Some(account) => match account.password_hash.clone() {
                Some(hash) => (hash, Some(account)),
                None => (self.dummy_hash.clone(), None),
            },
            None => (self.dummy_hash.clone(), None),
        };

        let matched = verify_hash(hash, secret.expose_secret().to_string()).await?;

        Ok(candidate.filter(|account| matched && account.verified))
    }
}
