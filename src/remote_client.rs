//! Remote key-value client used by the remote layer
//!
//! The layer only needs a handful of commands, so it talks to the store
//! through [`RemoteClient`] rather than a concrete connection type. The
//! production implementation is Redis' `ConnectionManager`, which is cheap
//! to clone and reconnects on its own.

use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult};
use std::sync::Arc;

/// Commands the remote layer issues against the store.
#[async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    /// `GET key`
    async fn get(&self, key: &str) -> RedisResult<Option<String>>;

    /// `SET key value PX ttl_ms`
    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RedisResult<()>;

    /// `DEL key`, returning the number of removed keys
    async fn del(&self, key: &str) -> RedisResult<u64>;

    /// `HGET key field`
    async fn hget(&self, key: &str, field: &str) -> RedisResult<Option<String>>;

    /// `HSET key field value`
    async fn hset(&self, key: &str, field: &str, value: &str) -> RedisResult<()>;

    /// `HDEL key field`, returning the number of removed fields
    async fn hdel(&self, key: &str, field: &str) -> RedisResult<u64>;

    /// `PEXPIRE key ttl_ms`, returning whether the key existed
    async fn pexpire(&self, key: &str, ttl_ms: u64) -> RedisResult<bool>;
}

/// Open a shared Redis client handle suitable for [`RemoteLayerConfig`](crate::RemoteLayerConfig).
pub async fn connect(redis_client: redis::Client) -> RedisResult<Arc<dyn RemoteClient>> {
    let manager = redis::aio::ConnectionManager::new(redis_client).await?;
    Ok(Arc::new(manager))
}

#[async_trait]
impl RemoteClient for redis::aio::ConnectionManager {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        let mut conn = self.clone();
        AsyncCommands::get(&mut conn, key).await
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RedisResult<()> {
        let mut conn = self.clone();
        AsyncCommands::pset_ex(&mut conn, key, value, ttl_ms).await
    }

    async fn del(&self, key: &str) -> RedisResult<u64> {
        let mut conn = self.clone();
        AsyncCommands::del(&mut conn, key).await
    }

    async fn hget(&self, key: &str, field: &str) -> RedisResult<Option<String>> {
        let mut conn = self.clone();
        AsyncCommands::hget(&mut conn, key, field).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> RedisResult<()> {
        let mut conn = self.clone();
        AsyncCommands::hset(&mut conn, key, field, value).await
    }

    async fn hdel(&self, key: &str, field: &str) -> RedisResult<u64> {
        let mut conn = self.clone();
        AsyncCommands::hdel(&mut conn, key, field).await
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> RedisResult<bool> {
        let mut conn = self.clone();
        let ttl_ms = i64::try_from(ttl_ms).unwrap_or(i64::MAX);
        AsyncCommands::pexpire(&mut conn, key, ttl_ms).await
    }
}
