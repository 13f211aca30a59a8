//! Key/value store adapter used by every stateful auth component.
//!
//! Two implementations: [`RedisStore`] for shared deployments and
//! [`MemoryStore`] for single-instance runs and tests.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use super::bucket::{Admission, BucketLimit};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically read and delete a key. At most one concurrent caller
    /// observes `Some` for the same stored value.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete `key` only if it holds `expected`, as one atomic step.
    /// Returns whether it did; a mismatch leaves the value in place.
    async fn take_if_equal(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Refill and consume one token from the bucket at `key` as a single
    /// atomic step.
    async fn consume_token(
        &self,
        key: &str,
        limit: &BucketLimit,
        now_ms: i64,
    ) -> Result<Admission, StoreError>;
}
