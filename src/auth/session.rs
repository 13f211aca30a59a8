//! Login orchestration: verify credentials, then start a single session.

use super::{
    accounts::Subject,
    credentials::CredentialVerifier,
    error::AuthError,
    refresh::{RefreshTokenStore, TokenPair},
    utils::mask_email,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct SessionAuthenticator {
    credentials: Arc<CredentialVerifier>,
    sessions: Arc<RefreshTokenStore>,
}

impl SessionAuthenticator {
    #[must_use]
    pub fn new(credentials: Arc<CredentialVerifier>, sessions: Arc<RefreshTokenStore>) -> Self {
        Self {
            credentials,
            sessions,
        }
    }

    /// `email` must already be normalized.
    /// # Errors
    /// [`AuthError::InvalidCredentials`] (padded) on any credential failure,
    /// [`AuthError::Unavailable`] if the session cannot be recorded.
    #[instrument(skip(self, email, secret))]
    pub async fn login(&self, email: &str, secret: &SecretString) -> Result<TokenPair, AuthError> {
        let account = self.credentials.authenticate(email, secret).await?;
        let pair = self.sessions.issue(&Subject::from(&account)).await?;
        info!("Login succeeded for {}", mask_email(email));
        Ok(pair)
    }
}
