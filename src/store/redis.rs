//! Redis-backed shared store
//!
//! The counter increment runs as a single Lua script so INCR and EXPIRE
//! cannot be interleaved with another replica's increment.

use super::{ttl_seconds, SharedStore, StoreError};
use ::redis::AsyncCommands;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// INCR, then set the expiry when the counter is new (or somehow lost its TTL)
static INCR_WITH_EXPIRY: Lazy<::redis::Script> = Lazy::new(|| {
    ::redis::Script::new(
        r#"
        local current = redis.call("INCR", KEYS[1])
        if current == 1 or redis.call("TTL", KEYS[1]) == -1 then
            redis.call("EXPIRE", KEYS[1], ARGV[1])
        end
        return current
        "#,
    )
});

pub struct RedisStore {
    _client: Arc<::redis::Client>,
    connection_manager: ::redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(connection_string: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(connection_string)
            .map_err(|e| StoreError::Connection(format!("Failed to create Redis client: {e}")))?;

        let connection_manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {e}")))?;

        debug!("Connected to Redis store");

        Ok(Self {
            _client: Arc::new(client),
            connection_manager,
        })
    }
}

fn command_error(op: &str, e: ::redis::RedisError) -> StoreError {
    StoreError::Command(format!("Redis {op} failed: {e}"))
}

#[async_trait]
impl SharedStore for RedisStore {
    fn backend(&self) -> &str {
        "redis"
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection_manager.clone();
        let count: i64 = INCR_WITH_EXPIRY
            .key(key)
            .arg(ttl_seconds(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                if e.to_string().contains("not an integer") {
                    StoreError::NotACounter(key.to_string())
                } else {
                    command_error("INCR", e)
                }
            })?;
        Ok(count.max(0) as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = conn.get(key).await.map_err(|e| command_error("GET", e))?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl_seconds(ttl))
            .await
            .map_err(|e| command_error("SET", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let _: () = conn.del(key).await.map_err(|e| command_error("DEL", e))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection_manager.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("PING", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisStore::connect("not-a-redis-url").await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redis_incr_with_expiry() {
        let store = RedisStore::connect("redis://localhost:6379").await.unwrap();
        let key = format!("test:incr:{}", uuid::Uuid::new_v4());
        let ttl = Duration::from_secs(30);

        assert_eq!(store.incr_with_expiry(&key, ttl).await.unwrap(), 1);
        assert_eq!(store.incr_with_expiry(&key, ttl).await.unwrap(), 2);
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redis_set_get_roundtrip() {
        let store = RedisStore::connect("redis://localhost:6379").await.unwrap();
        let key = format!("test:kv:{}", uuid::Uuid::new_v4());

        store
            .set_with_ttl(&key, "value", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("value"));
        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }
}
