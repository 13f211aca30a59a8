//! Token bucket arithmetic shared by the store-backed limiter and the
//! in-process fallback.
//!
//! A bucket refills continuously: `capacity` tokens spread evenly over
//! `window`. State is `(tokens, updated_at_ms)`; a missing bucket is full.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketLimit {
    pub capacity: u32,
    pub window: Duration,
}

impl BucketLimit {
    #[must_use]
    pub const fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }

    pub(crate) fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX).max(1)
    }

    /// Idle buckets are kept for one full window, after which they would be
    /// full again anyway.
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        self.window.max(Duration::from_secs(1))
    }
}

/// Outcome of a single admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub retry_after_seconds: u64,
}

impl Admission {
    #[must_use]
    pub const fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_seconds: 0,
        }
    }

    /// Denied admission; the wait is rounded up to whole seconds and never zero.
    #[must_use]
    pub fn denied(wait_ms: i64) -> Self {
        let wait_ms = u64::try_from(wait_ms).unwrap_or(0);
        Self {
            allowed: false,
            retry_after_seconds: wait_ms.div_ceil(1000).max(1),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TokenBucket {
    tokens: f64,
    updated_at_ms: i64,
}

impl TokenBucket {
    pub(crate) fn full(limit: &BucketLimit, now_ms: i64) -> Self {
        Self {
            tokens: f64::from(limit.capacity),
            updated_at_ms: now_ms,
        }
    }

    pub(crate) fn updated_at_ms(&self) -> i64 {
        self.updated_at_ms
    }

    fn refill(&mut self, limit: &BucketLimit, now_ms: i64) {
        let capacity = f64::from(limit.capacity);
        // Clock going backwards never refills.
        let elapsed = (now_ms - self.updated_at_ms).max(0);
        #[allow(clippy::cast_precision_loss)]
        let refilled = elapsed as f64 * capacity / limit.window_ms() as f64;
        self.tokens = (self.tokens + refilled).min(capacity);
        self.updated_at_ms = self.updated_at_ms.max(now_ms);
    }

    pub(crate) fn try_consume(&mut self, limit: &BucketLimit, now_ms: i64) -> Admission {
        self.refill(limit, now_ms);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Admission::allowed();
        }

        if limit.capacity == 0 {
            return Admission::denied(limit.window_ms());
        }

        let missing = 1.0 - self.tokens;
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let wait_ms = (missing * limit.window_ms() as f64 / f64::from(limit.capacity)).ceil() as i64;
        Admission::denied(wait_ms)
    }
}
