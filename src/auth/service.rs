//! The auth subsystem as one injectable value.

use super::{
    accounts::{AccountDirectory, NewAccount, Role, Subject},
    blacklist::TokenBlacklist,
    claims::{ClaimsEnricher, EnrichedClaims},
    config::AuthConfig,
    credentials::{hash_secret, CredentialVerifier},
    error::AuthError,
    federated::{AccountLinker, FederatedProfile, FederatedResolution},
    kv::KeyValueStore,
    rate_limit::{BucketRateLimiter, RateLimitFeature, RateLimiter},
    refresh::{RefreshTokenStore, TokenPair},
    session::SessionAuthenticator,
    token::{now_seconds, TokenCodec, TokenKind},
    utils::{
        mask_email, mask_ip, normalize_email, normalize_phone, valid_display_name, valid_email,
        valid_password,
    },
    verification::VerificationCodes,
};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Local email signup, completed with a code from
/// [`AuthService::send_verification_code`].
pub struct LocalSignup {
    pub email: String,
    pub display_name: String,
    pub phone: String,
    pub password: SecretString,
    pub verification_code: SecretString,
}

impl std::fmt::Debug for LocalSignup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSignup")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

pub struct AuthService {
    config: AuthConfig,
    codec: Arc<TokenCodec>,
    rate_limiter: Arc<dyn RateLimiter>,
    blacklist: Arc<TokenBlacklist>,
    sessions: Arc<RefreshTokenStore>,
    authenticator: SessionAuthenticator,
    claims: ClaimsEnricher,
    linker: AccountLinker,
    codes: VerificationCodes,
    accounts: Arc<dyn AccountDirectory>,
}

impl AuthService {
    /// Wire every component over one store and one account directory.
    /// # Errors
    /// Fails if the credential verifier cannot be initialized.
    pub fn new(
        config: AuthConfig,
        codec: TokenCodec,
        store: Arc<dyn KeyValueStore>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Result<Self> {
        let rate_limiter = Arc::new(BucketRateLimiter::new(
            store.clone(),
            *config.rate_limits(),
        ));
        Self::with_rate_limiter(config, codec, store, accounts, rate_limiter)
    }

    /// # Errors
    /// Fails if the credential verifier cannot be initialized.
    pub fn with_rate_limiter(
        config: AuthConfig,
        codec: TokenCodec,
        store: Arc<dyn KeyValueStore>,
        accounts: Arc<dyn AccountDirectory>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self> {
        let codec = Arc::new(codec);
        let blacklist = Arc::new(TokenBlacklist::new(store.clone(), codec.clone()));
        let sessions = Arc::new(RefreshTokenStore::new(
            store.clone(),
            codec.clone(),
            blacklist.clone(),
            accounts.clone(),
        ));
        let credentials = Arc::new(CredentialVerifier::new(
            accounts.clone(),
            config.password_params(),
            config.min_failure_response(),
        )?);

        Ok(Self {
            authenticator: SessionAuthenticator::new(credentials, sessions.clone()),
            claims: ClaimsEnricher::new(
                accounts.clone(),
                store.clone(),
                config.claims_cache_ttl(),
            ),
            linker: AccountLinker::new(accounts.clone()),
            codes: VerificationCodes::new(store, config.verification_code_ttl()),
            config,
            codec,
            rate_limiter,
            blacklist,
            sessions,
            accounts,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Password login, rate limited per client IP and per email.
    /// # Errors
    /// [`AuthError::RateLimitExceeded`], [`AuthError::InvalidCredentials`]
    /// or [`AuthError::Unavailable`].
    #[instrument(skip(self, email, secret, client_ip))]
    pub async fn login(
        &self,
        email: &str,
        secret: &SecretString,
        client_ip: &str,
    ) -> Result<TokenPair, AuthError> {
        let email = normalize_email(email);
        self.rate_limiter.check_login(client_ip, &email).await?;
        self.authenticator.login(&email, secret).await
    }

    /// Rotate a refresh token.
    /// # Errors
    /// [`AuthError::RateLimitExceeded`], [`AuthError::InvalidToken`] or
    /// [`AuthError::Unavailable`].
    #[instrument(skip(self, refresh_token, client_ip))]
    pub async fn refresh(&self, refresh_token: &str, client_ip: &str) -> Result<TokenPair, AuthError> {
        self.rate_limiter
            .check(RateLimitFeature::Refresh, client_ip)
            .await?;
        self.sessions.rotate(refresh_token).await
    }

    /// Revoke whatever tokens were presented. Never fails.
    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        client_ip: &str,
    ) {
        debug!("Logout from {}", mask_ip(client_ip));
        if let Some(token) = access_token {
            match self.codec.parse_kind(token, TokenKind::Access) {
                Ok(claims) => {
                    if let Err(err) = self
                        .blacklist
                        .revoke(token, claims.remaining_lifetime(now_seconds()))
                        .await
                    {
                        warn!("Failed to blacklist access token on logout: {err}");
                    }
                }
                Err(err) => debug!("Ignoring access token on logout: {err}"),
            }
        }

        if let Some(token) = refresh_token {
            match self.codec.parse_kind(token, TokenKind::Refresh) {
                Ok(_) => self.sessions.revoke(token).await,
                Err(err) => debug!("Ignoring refresh token on logout: {err}"),
            }
        }
    }

    /// Verify an access token and enrich its claims.
    /// # Errors
    /// [`AuthError::InvalidToken`] for invalid, expired, wrong-kind or revoked
    /// tokens (including when revocation status is unknown).
    pub async fn verify_access(&self, access_token: &str) -> Result<EnrichedClaims, AuthError> {
        let claims = self
            .codec
            .parse_kind(access_token, TokenKind::Access)
            .map_err(|err| {
                debug!("Rejected access token: {err}");
                AuthError::InvalidToken
            })?;

        if self.blacklist.is_jti_revoked(&claims.jti).await {
            return Err(AuthError::InvalidToken);
        }

        self.claims.enrich(&claims).await
    }

    /// Resolve a provider login to an existing or new account.
    /// # Errors
    /// See [`AccountLinker::resolve`].
    pub async fn resolve_federated_login(
        &self,
        profile: FederatedProfile,
    ) -> Result<FederatedResolution, AuthError> {
        self.linker.resolve(profile).await
    }

    /// Finish signup for a provider identity with no local account yet and
    /// start its session.
    /// # Errors
    /// [`AuthError::InvalidRequest`] for an invalid profile or phone, or if
    /// the email is already registered; [`AuthError::Unavailable`] otherwise.
    #[instrument(skip(self, profile, phone))]
    pub async fn complete_federated_signup(
        &self,
        profile: FederatedProfile,
        phone: &str,
    ) -> Result<TokenPair, AuthError> {
        let profile = profile.validated()?;
        let phone = normalize_phone(phone)
            .ok_or(AuthError::InvalidRequest("phone number is invalid"))?;

        match self.accounts.find_by_email(&profile.email).await {
            Ok(None) => {}
            Ok(Some(_)) => {
                return Err(AuthError::InvalidRequest("account already exists"));
            }
            Err(err) => {
                error!("Account lookup failed during federated signup: {err:#}");
                return Err(AuthError::Unavailable);
            }
        }

        let account = self
            .accounts
            .create(NewAccount {
                linked_identity: Some(profile.linked_identity()),
                email: profile.email,
                display_name: profile.name,
                role: Role::User,
                verified: true,
                password_hash: None,
                phone: Some(phone),
            })
            .await
            .map_err(|err| {
                error!("Failed to create federated account: {err:#}");
                AuthError::Unavailable
            })?;

        info!("Created federated account {}", mask_email(&account.email));
        self.sessions.issue(&Subject::from(&account)).await
    }

    /// Issue a one-time code for `email`, rate limited per client IP.
    ///
    /// The caller delivers the code; it is never logged.
    /// # Errors
    /// [`AuthError::RateLimitExceeded`], [`AuthError::InvalidRequest`] for a
    /// malformed email, or [`AuthError::Unavailable`].
    #[instrument(skip(self, email, client_ip))]
    pub async fn send_verification_code(
        &self,
        email: &str,
        client_ip: &str,
    ) -> Result<SecretString, AuthError> {
        self.check_email_send(client_ip).await?;
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidRequest("email is invalid"));
        }
        self.codes.issue(&email).await
    }

    /// Create a verified local account. The verification code is checked
    /// after every other rule, so a rejected request does not burn it.
    /// # Errors
    /// [`AuthError::RateLimitExceeded`] from the signup or verify-code
    /// bucket, [`AuthError::InvalidRequest`] for invalid fields or an existing
    /// account, [`AuthError::InvalidVerificationCode`], or
    /// [`AuthError::Unavailable`].
    #[instrument(skip(self, request, client_ip))]
    pub async fn signup(&self, request: LocalSignup, client_ip: &str) -> Result<Subject, AuthError> {
        self.check_signup(client_ip).await?;

        let email = normalize_email(&request.email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidRequest("email is invalid"));
        }
        let display_name = request.display_name.trim().to_string();
        if !valid_display_name(&display_name) {
            return Err(AuthError::InvalidRequest("name must be 2 to 50 characters"));
        }
        let phone = normalize_phone(&request.phone)
            .ok_or(AuthError::InvalidRequest("phone number is invalid"))?;
        if !valid_password(request.password.expose_secret()) {
            return Err(AuthError::InvalidRequest(
                "password must be 6 to 20 characters with upper, lower, digit and special",
            ));
        }

        match self.accounts.find_by_email(&email).await {
            Ok(None) => {}
            Ok(Some(_)) => return Err(AuthError::InvalidRequest("account already exists")),
            Err(err) => {
                error!("Account lookup failed during signup: {err:#}");
                return Err(AuthError::Unavailable);
            }
        }

        self.check_verify_code(&email).await?;
        self.codes.redeem(&email, &request.verification_code).await?;

        let params = self.config.password_params().clone();
        let password = request.password;
        let password_hash =
            tokio::task::spawn_blocking(move || hash_secret(password.expose_secret(), &params))
                .await
                .map_err(|err| {
                    error!("Password hashing task failed: {err}");
                    AuthError::Unavailable
                })?
                .map_err(|err| {
                    error!("Failed to hash password: {err:#}");
                    AuthError::Unavailable
                })?;

        let account = self
            .accounts
            .create(NewAccount {
                email,
                display_name,
                role: Role::User,
                verified: true,
                password_hash: Some(password_hash),
                phone: Some(phone),
                linked_identity: None,
            })
            .await
            .map_err(|err| {
                error!("Failed to create account: {err:#}");
                AuthError::Unavailable
            })?;

        info!("Created local account {}", mask_email(&account.email));
        Ok(Subject::from(&account))
    }

    /// Revoke every refresh session and tracked access token of an account,
    /// e.g. after a password change, and drop its cached claims.
    pub async fn revoke_all_tokens(&self, subject: &Subject) {
        self.sessions.revoke_all(subject.id).await;
        self.sessions.revoke_access_tokens(subject.id).await;
        self.claims.evict(&subject.email, subject.id).await;
    }

    /// Call after role or display name changes.
    pub async fn account_updated(&self, subject: &Subject) {
        self.claims.evict(&subject.email, subject.id).await;
    }

    /// Call after changes that touch many accounts at once, e.g. a role
    /// migration.
    pub async fn all_accounts_updated(&self) {
        self.claims.evict_all().await;
    }

    /// # Errors
    /// [`AuthError::RateLimitExceeded`] when the signup bucket is empty.
    pub async fn check_signup(&self, client_ip: &str) -> Result<(), AuthError> {
        self.check_feature(RateLimitFeature::Signup, client_ip).await
    }

    /// # Errors
    /// [`AuthError::RateLimitExceeded`] when the email-send bucket is empty.
    pub async fn check_email_send(&self, client_ip: &str) -> Result<(), AuthError> {
        self.check_feature(RateLimitFeature::EmailSend, client_ip)
            .await
    }

    /// # Errors
    /// [`AuthError::RateLimitExceeded`] when the verify-code bucket is empty.
    pub async fn check_verify_code(&self, email: &str) -> Result<(), AuthError> {
        self.check_feature(RateLimitFeature::VerifyCode, &normalize_email(email))
            .await
    }

    async fn check_feature(&self, feature: RateLimitFeature, key: &str) -> Result<(), AuthError> {
        let result = self.rate_limiter.check(feature, key).await;
        if result.is_err() {
            info!("Rate limit hit for {feature} by {}", feature.masked(key));
        }
        result
    }
}
