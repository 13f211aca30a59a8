use super::{KeyValueStore, StoreError};
use crate::auth::bucket::{Admission, BucketLimit};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::{future::Future, time::Duration};
use tracing::{info, instrument};

// KEYS[1] bucket; ARGV capacity, window_ms, now_ms, idle_ttl_ms.
// Returns {allowed (0|1), wait_ms}.
const CONSUME_TOKEN_LUA: &str = r"
local capacity = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local idle_ttl_ms = tonumber(ARGV[4])

local state = redis.call('HMGET', KEYS[1], 'tokens', 'updated_at')
local tokens = tonumber(state[1])
local updated_at = tonumber(state[2])
if tokens == nil or updated_at == nil then
  tokens = capacity
  updated_at = now_ms
end

local elapsed = now_ms - updated_at
if elapsed < 0 then
  elapsed = 0
end
tokens = math.min(capacity, tokens + (elapsed * capacity / window_ms))
if now_ms > updated_at then
  updated_at = now_ms
end

local allowed = 0
local wait_ms = 0
if tokens >= 1 then
  tokens = tokens - 1
  allowed = 1
elseif capacity > 0 then
  wait_ms = math.ceil((1 - tokens) * window_ms / capacity)
else
  wait_ms = window_ms
end

redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'updated_at', tostring(updated_at))
redis.call('PEXPIRE', KEYS[1], idle_ttl_ms)
return {allowed, wait_ms}
";

// Portable GETDEL for servers older than 6.2.
const TAKE_LUA: &str = r"
local value = redis.call('GET', KEYS[1])
if value then
  redis.call('DEL', KEYS[1])
end
return value
";

// KEYS[1] key; ARGV[1] expected value. Returns 1 when deleted.
const TAKE_IF_EQUAL_LUA: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
";

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Unavailable(format!("redis timeout: {err}"))
        } else if err.kind() == redis::ErrorKind::TypeError {
            Self::Protocol(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Redis (or Valkey) backed store. Every call is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    timeout: Duration,
    consume_token: Script,
    take: Script,
    take_if_equal: Script,
}

impl RedisStore {
    /// Connect to `redis_url`, e.g. `redis://:password@127.0.0.1/0`.
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    #[instrument(skip(redis_url))]
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;

        let connection = match tokio::time::timeout(timeout, client.get_connection_manager()).await
        {
            Ok(connection) => connection?,
            Err(_) => return Err(StoreError::Timeout(timeout)),
        };

        info!("Connected to redis");

        Ok(Self {
            connection,
            timeout,
            consume_token: Script::new(CONSUME_TOKEN_LUA),
            take: Script::new(TAKE_LUA),
            take_if_equal: Script::new(TAKE_IF_EQUAL_LUA),
        })
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn ttl_ms_signed(ttl: Duration) -> i64 {
    i64::try_from(ttl_ms(ttl)).unwrap_or(i64::MAX)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = self
            .bounded(connection.pset_ex(key, value, ttl_ms(ttl)))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = self.bounded(connection.get(key)).await?;
        Ok(value)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        let value: Option<String> = self
            .bounded(self.take.key(key).invoke_async(&mut connection))
            .await?;
        Ok(value)
    }

    async fn take_if_equal(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let deleted: i64 = self
            .bounded(
                self.take_if_equal
                    .key(key)
                    .arg(expected)
                    .invoke_async(&mut connection),
            )
            .await?;
        Ok(deleted == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: i64 = self.bounded(connection.del(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let found: bool = self.bounded(connection.exists(key)).await?;
        Ok(found)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: i64 = self.bounded(connection.sadd(key, member)).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: i64 = self.bounded(connection.srem(key, member)).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut connection = self.connection.clone();
        let members: Vec<String> = self.bounded(connection.smembers(key)).await?;
        Ok(members)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: bool = self
            .bounded(connection.pexpire(key, ttl_ms_signed(ttl)))
            .await?;
        Ok(())
    }

    async fn consume_token(
        &self,
        key: &str,
        limit: &BucketLimit,
        now_ms: i64,
    ) -> Result<Admission, StoreError> {
        let mut connection = self.connection.clone();
        let reply: Vec<i64> = self
            .bounded(
                self.consume_token
                    .key(key)
                    .arg(limit.capacity)
                    .arg(limit.window_ms())
                    .arg(now_ms)
                    .arg(ttl_ms_signed(limit.idle_ttl()))
                    .invoke_async(&mut connection),
            )
            .await?;

        match reply.as_slice() {
            [1, _] => Ok(Admission::allowed()),
            [0, wait_ms] => Ok(Admission::denied(*wait_ms)),
            other => Err(StoreError::Protocol(format!(
                "token bucket script returned {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_never_zero() {
        assert_eq!(ttl_ms(Duration::ZERO), 1);
        assert_eq!(ttl_ms(Duration::from_secs(2)), 2_000);
        assert_eq!(ttl_ms_signed(Duration::from_millis(1500)), 1_500);
    }

    #[test]
    fn redis_errors_map_to_store_errors() {
        let err = redis::RedisError::from((redis::ErrorKind::TypeError, "bad type"));
        assert!(matches!(StoreError::from(err), StoreError::Protocol(_)));

        let err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        assert!(matches!(StoreError::from(err), StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn connect_rejects_invalid_url() {
        let result = RedisStore::connect("not a url", Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
