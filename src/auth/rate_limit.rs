//! Token-bucket admission control keyed by `(feature, subject)`.
//!
//! Buckets live in the shared store so limits hold across instances. When
//! the store is unreachable the limiter fails open to per-process buckets,
//! which keeps limiting active on each instance but no longer cluster-wide.

use super::{
    bucket::{Admission, BucketLimit, TokenBucket},
    config::RateLimitConfig,
    error::AuthError,
    kv::KeyValueStore,
    utils::{mask_email, mask_ip},
};
use async_trait::async_trait;
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "ratelimit:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitFeature {
    EmailSend,
    VerifyCode,
    Signup,
    LoginByIp,
    LoginByEmail,
    Refresh,
}

impl RateLimitFeature {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailSend => "email_send",
            Self::VerifyCode => "verify_code",
            Self::Signup => "signup",
            Self::LoginByIp => "login_ip",
            Self::LoginByEmail => "login_email",
            Self::Refresh => "refresh",
        }
    }

    #[must_use]
    pub fn limit(self, config: &RateLimitConfig) -> BucketLimit {
        match self {
            Self::EmailSend => config.email_send,
            Self::VerifyCode => config.verify_code,
            Self::Signup => config.signup,
            Self::LoginByIp => config.login_by_ip,
            Self::LoginByEmail => config.login_by_email,
            Self::Refresh => config.refresh,
        }
    }

    pub(crate) fn masked(self, subject_key: &str) -> String {
        match self {
            Self::LoginByEmail | Self::VerifyCode => mask_email(subject_key),
            _ => mask_ip(subject_key),
        }
    }
}

impl fmt::Display for RateLimitFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[must_use]
pub fn bucket_key(feature: RateLimitFeature, subject_key: &str) -> String {
    format!("{KEY_PREFIX}{feature}:{subject_key}")
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn admit(&self, feature: RateLimitFeature, subject_key: &str) -> Admission;

    /// # Errors
    /// Returns [`AuthError::RateLimitExceeded`] when the bucket is empty.
    async fn check(&self, feature: RateLimitFeature, subject_key: &str) -> Result<(), AuthError> {
        let admission = self.admit(feature, subject_key).await;
        if admission.allowed {
            Ok(())
        } else {
            debug!(
                "Rate limited {feature} for {}",
                feature.masked(subject_key)
            );
            Err(AuthError::RateLimitExceeded {
                retry_after_seconds: admission.retry_after_seconds,
            })
        }
    }

    /// Login is limited per client IP first, then per identity.
    /// # Errors
    /// Returns [`AuthError::RateLimitExceeded`] from whichever check trips.
    async fn check_login(&self, client_ip: &str, identity: &str) -> Result<(), AuthError> {
        self.check(RateLimitFeature::LoginByIp, client_ip).await?;
        self.check(RateLimitFeature::LoginByEmail, identity).await
    }
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn admit(&self, _feature: RateLimitFeature, _subject_key: &str) -> Admission {
        Admission::allowed()
    }
}

struct LocalBucket {
    bucket: TokenBucket,
    idle_ms: i64,
}

pub struct BucketRateLimiter {
    store: Arc<dyn KeyValueStore>,
    limits: RateLimitConfig,
    fallback: Mutex<HashMap<String, LocalBucket>>,
}

impl BucketRateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, limits: RateLimitConfig) -> Self {
        Self {
            store,
            limits,
            fallback: Mutex::new(HashMap::new()),
        }
    }

    async fn admit_locally(&self, key: String, limit: &BucketLimit, now_ms: i64) -> Admission {
        let mut buckets = self.fallback.lock().await;
        if !buckets.contains_key(&key) {
            buckets.retain(|_, local| now_ms - local.bucket.updated_at_ms() < local.idle_ms);
        }
        let local = buckets.entry(key).or_insert_with(|| LocalBucket {
            bucket: TokenBucket::full(limit, now_ms),
            idle_ms: limit.window_ms(),
        });
        local.bucket.try_consume(limit, now_ms)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl RateLimiter for BucketRateLimiter {
    async fn admit(&self, feature: RateLimitFeature, subject_key: &str) -> Admission {
        let limit = feature.limit(&self.limits);
        let key = bucket_key(feature, subject_key);
        let now_ms = now_ms();

        match self.store.consume_token(&key, &limit, now_ms).await {
            Ok(admission) => admission,
            Err(err) => {
                warn!("Rate limit store unavailable, using local bucket for {feature}: {err}");
                self.admit_locally(key, &limit, now_ms).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::kv::MemoryStore;
    use std::time::Duration;

    fn limiter(store: Arc<MemoryStore>, signup: BucketLimit) -> BucketRateLimiter {
        BucketRateLimiter::new(
            store,
            RateLimitConfig {
                signup,
                ..RateLimitConfig::default()
            },
        )
    }

    #[test]
    fn keys_are_namespaced_per_feature() {
        assert_eq!(
            bucket_key(RateLimitFeature::Signup, "9.9.9.9"),
            "ratelimit:signup:9.9.9.9"
        );
        assert_ne!(
            bucket_key(RateLimitFeature::LoginByIp, "x"),
            bucket_key(RateLimitFeature::Refresh, "x")
        );
    }

    #[tokio::test]
    async fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        for _ in 0..100 {
            assert!(limiter
                .check(RateLimitFeature::Signup, "9.9.9.9")
                .await
                .is_ok());
        }
    }

    #[tokio::test]
    async fn features_do_not_share_buckets() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(store, BucketLimit::new(1, Duration::from_secs(60)));
        assert!(limiter.check(RateLimitFeature::Signup, "ip").await.is_ok());
        assert!(limiter.check(RateLimitFeature::Signup, "ip").await.is_err());
        assert!(limiter.check(RateLimitFeature::EmailSend, "ip").await.is_ok());
        assert!(limiter.check(RateLimitFeature::Signup, "other").await.is_ok());
    }

    #[tokio::test]
    async fn login_checks_ip_then_email() {
        let store = Arc::new(MemoryStore::new());
        let limiter = BucketRateLimiter::new(store, RateLimitConfig::default());
        // login_by_email allows 3, login_by_ip allows 5
        for i in 0..3 {
            assert!(limiter
                .check_login(&format!("10.0.0.{i}"), "a@x.com")
                .await
                .is_ok());
        }
        assert!(matches!(
            limiter.check_login("10.0.0.9", "a@x.com").await,
            Err(AuthError::RateLimitExceeded { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn local_buckets_admit_exactly_capacity_under_contention() {
        let store = Arc::new(MemoryStore::new());
        let limiter = Arc::new(limiter(
            store.clone(),
            BucketLimit::new(7, Duration::from_secs(3600)),
        ));
        store.set_available(false);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let limiter = limiter.clone();
            tasks.spawn(async move { limiter.admit(RateLimitFeature::Signup, "ip").await.allowed });
        }
        let mut allowed = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 7);
    }

    #[tokio::test]
    async fn store_outage_falls_back_to_local_buckets() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter(store.clone(), BucketLimit::new(2, Duration::from_secs(60)));
        store.set_available(false);
        assert!(limiter.check(RateLimitFeature::Signup, "ip").await.is_ok());
        assert!(limiter.check(RateLimitFeature::Signup, "ip").await.is_ok());
        let err = limiter
            .check(RateLimitFeature::Signup, "ip")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::RateLimitExceeded { retry_after_seconds } if retry_after_seconds > 0
        ));
    }
}
