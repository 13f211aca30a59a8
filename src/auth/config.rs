//! Immutable auth configuration, built once at startup.

use super::bucket::BucketLimit;
use std::time::Duration;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_MIN_FAILURE_RESPONSE_MS: u64 = 200;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;
const DEFAULT_CLAIMS_CACHE_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_VERIFICATION_CODE_TTL_SECONDS: u64 = 5 * 60;

const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

/// One bucket limit per rate-limited feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub email_send: BucketLimit,
    pub verify_code: BucketLimit,
    pub signup: BucketLimit,
    pub login_by_ip: BucketLimit,
    pub login_by_email: BucketLimit,
    pub refresh: BucketLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            email_send: BucketLimit::new(3, minutes(5)),
            verify_code: BucketLimit::new(5, minutes(10)),
            signup: BucketLimit::new(10, minutes(60)),
            login_by_ip: BucketLimit::new(5, minutes(15)),
            login_by_email: BucketLimit::new(3, minutes(15)),
            refresh: BucketLimit::new(10, minutes(5)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    min_failure_response: Duration,
    store_timeout: Duration,
    claims_cache_ttl: Duration,
    verification_code_ttl: Duration,
    trust_proxy_headers: bool,
    password_params: argon2::Params,
    rate_limits: RateLimitConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            min_failure_response: Duration::from_millis(DEFAULT_MIN_FAILURE_RESPONSE_MS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            claims_cache_ttl: Duration::from_secs(DEFAULT_CLAIMS_CACHE_TTL_SECONDS),
            verification_code_ttl: Duration::from_secs(DEFAULT_VERIFICATION_CODE_TTL_SECONDS),
            trust_proxy_headers: false,
            password_params: argon2::Params::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_min_failure_response(mut self, duration: Duration) -> Self {
        self.min_failure_response = duration;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Upper bound on how long a cached role or display name can outlive an
    /// account change that was not followed by an eviction.
    #[must_use]
    pub fn with_claims_cache_ttl(mut self, ttl: Duration) -> Self {
        self.claims_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_verification_code_ttl(mut self, ttl: Duration) -> Self {
        self.verification_code_ttl = ttl;
        self
    }

    /// Key per-IP limits on `X-Forwarded-For` / `X-Real-IP`. Only enable
    /// behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn with_password_params(mut self, params: argon2::Params) -> Self {
        self.password_params = params;
        self
    }

    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn min_failure_response(&self) -> Duration {
        self.min_failure_response
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn claims_cache_ttl(&self) -> Duration {
        self.claims_cache_ttl
    }

    #[must_use]
    pub fn verification_code_ttl(&self) -> Duration {
        self.verification_code_ttl
    }

    #[must_use]
    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    #[must_use]
    pub fn password_params(&self) -> &argon2::Params {
        &self.password_params
    }

    #[must_use]
    pub fn rate_limits(&self) -> &RateLimitConfig {
        &self.rate_limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.signup, BucketLimit::new(10, minutes(60)));
        assert_eq!(limits.login_by_ip, BucketLimit::new(5, minutes(15)));
        assert_eq!(limits.login_by_email, BucketLimit::new(3, minutes(15)));
        assert_eq!(limits.refresh, BucketLimit::new(10, minutes(5)));

        let config = AuthConfig::new();
        assert_eq!(config.access_token_ttl(), Duration::from_secs(900));
        assert_eq!(config.refresh_token_ttl(), Duration::from_secs(604_800));
        assert_eq!(config.min_failure_response(), Duration::from_millis(200));
        assert_eq!(config.claims_cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.verification_code_ttl(), Duration::from_secs(300));
        assert!(!config.trust_proxy_headers());
    }

    #[test]
    fn builders_override_defaults() {
        let config = AuthConfig::new()
            .with_access_token_ttl(Duration::from_secs(60))
            .with_min_failure_response(Duration::from_millis(50))
            .with_rate_limits(RateLimitConfig {
                refresh: BucketLimit::new(1, minutes(1)),
                ..RateLimitConfig::default()
            });
        assert_eq!(config.access_token_ttl(), Duration::from_secs(60));
        assert_eq!(config.min_failure_response(), Duration::from_millis(50));
        assert_eq!(config.rate_limits().refresh.capacity, 1);
    }
}
