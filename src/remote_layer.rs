//! Remote (Redis) layer
//!
//! Values are encoded with [`codec`](crate::codec) and written with a
//! millisecond expiry. The physical key is `namespace + prefix + key`. In
//! hash-map mode every key sharing a namespace and prefix becomes a field of
//! one hash stored under `namespace + prefix` (minus a trailing `:`), and
//! each write refreshes the expiry of the whole hash.
//!
//! Backend failures (I/O, protocol, a read losing its timeout race) either
//! propagate or, with `shallow_errors`, are logged and turned into a miss or
//! a silently dropped write. Configuration problems always propagate.

use redis::RedisResult;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{CacheError, CacheValue, RemoteClient, RemoteLayerConfig, codec};

/// Where a logical key lives in the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
enum StorageKey {
    Key(String),
    Field { hash: String, field: String },
}

/// Remote cache layer
pub struct RemoteLayer {
    config: RemoteLayerConfig,
}

impl RemoteLayer {
    /// The client is not checked here; operations fail with
    /// [`CacheError::MissingClient`] when none was configured.
    pub fn new(config: RemoteLayerConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RemoteLayerConfig {
        &self.config
    }

    pub fn client(&self) -> Result<&Arc<dyn RemoteClient>, CacheError> {
        self.config.client.as_ref().ok_or(CacheError::MissingClient)
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        self.get_in(key, None).await
    }

    pub async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.set_in(key, None, value, ttl).await
    }

    pub async fn clear(&self, key: &str) -> Result<(), CacheError> {
        self.clear_in(key, None).await
    }

    /// Like [`get`](Self::get), with `namespace` taking the place of the
    /// configured namespace.
    pub async fn get_with_namespace(
        &self,
        key: &str,
        namespace: &str,
    ) -> Result<Option<CacheValue>, CacheError> {
        self.get_in(key, Some(namespace)).await
    }

    pub async fn set_with_namespace(
        &self,
        key: &str,
        namespace: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.set_in(key, Some(namespace), value, ttl).await
    }

    pub async fn clear_with_namespace(&self, key: &str, namespace: &str) -> Result<(), CacheError> {
        self.clear_in(key, Some(namespace)).await
    }

    async fn get_in(
        &self,
        key: &str,
        namespace: Option<&str>,
    ) -> Result<Option<CacheValue>, CacheError> {
        let storage_key = self.storage_key(key, namespace)?;
        let client = Arc::clone(self.client()?);

        let raw = match self.read(client, storage_key).await {
            Ok(raw) => raw,
            Err(e) => {
                self.shallow("GET", key, e)?;
                return Ok(None);
            }
        };

        match raw.map(|raw| codec::decode(&raw)) {
            Some(value) if !value.is_undefined() => {
                debug!("Remote layer hit for key: {}", key);
                Ok(Some(value))
            }
            _ => {
                debug!("Remote layer miss for key: {}", key);
                Ok(None)
            }
        }
    }

    async fn set_in(
        &self,
        key: &str,
        namespace: Option<&str>,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let storage_key = self.storage_key(key, namespace)?;
        let client = self.client()?;
        let ttl_ms = as_millis(self.config.effective_ttl(ttl));

        let result = match codec::encode(value) {
            Ok(encoded) => write(client.as_ref(), &storage_key, &encoded, ttl_ms).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!("Remote layer set for key: {} (ttl {}ms)", key, ttl_ms);
                Ok(())
            }
            Err(e) => self.shallow("SET", key, e),
        }
    }

    async fn clear_in(&self, key: &str, namespace: Option<&str>) -> Result<(), CacheError> {
        let storage_key = self.storage_key(key, namespace)?;
        let client = self.client()?;

        let result = match &storage_key {
            StorageKey::Key(k) => client.del(k).await,
            StorageKey::Field { hash, field } => client.hdel(hash, field).await,
        };
        match result {
            Ok(_) => Ok(()),
            Err(e) => self.shallow("DEL", key, e.into()),
        }
    }

    fn storage_key(&self, key: &str, namespace: Option<&str>) -> Result<StorageKey, CacheError> {
        let namespace = namespace
            .or(self.config.namespace.as_deref())
            .unwrap_or_default();
        let prefix = self.config.prefix.as_deref().unwrap_or_default();

        if !self.config.use_hashmap {
            return Ok(StorageKey::Key(format!("{namespace}{prefix}{key}")));
        }
        if namespace.is_empty() && prefix.is_empty() {
            return Err(CacheError::config(
                "need to configure prefix or namespace to use hashmap mode",
            ));
        }
        let hash = format!("{namespace}{prefix}");
        Ok(StorageKey::Field {
            hash: hash.strip_suffix(':').unwrap_or(&hash).to_owned(),
            field: key.to_owned(),
        })
    }

    /// Read the raw value, racing the configured timeout.
    async fn read(
        &self,
        client: Arc<dyn RemoteClient>,
        storage_key: StorageKey,
    ) -> Result<Option<String>, CacheError> {
        let Some(timeout) = self.config.timeout else {
            return Ok(fetch(client.as_ref(), &storage_key).await?);
        };

        // Spawned so that losing the race leaves the read running; its result is dropped.
        let pending = tokio::spawn(async move { fetch(client.as_ref(), &storage_key).await });
        match tokio::time::timeout(timeout, pending).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join_err)) => Err(CacheError::Backend(Box::new(join_err))),
            Err(_) => Err(CacheError::Timeout(timeout)),
        }
    }

    fn shallow(&self, op: &str, key: &str, err: CacheError) -> Result<(), CacheError> {
        if self.config.shallow_errors && err.is_backend() {
            warn!(
                "Remote layer {} error for key {} ({}). Shallowing.",
                op, key, err
            );
            Ok(())
        } else {
            Err(err)
        }
    }
}

async fn fetch(client: &dyn RemoteClient, storage_key: &StorageKey) -> RedisResult<Option<String>> {
    match storage_key {
        StorageKey::Key(k) => client.get(k).await,
        StorageKey::Field { hash, field } => client.hget(hash, field).await,
    }
}

async fn write(
    client: &dyn RemoteClient,
    storage_key: &StorageKey,
    encoded: &str,
    ttl_ms: u64,
) -> Result<(), CacheError> {
    match storage_key {
        StorageKey::Key(k) => client.set_px(k, encoded, ttl_ms).await?,
        StorageKey::Field { hash, field } => {
            client.hset(hash, field, encoded).await?;
            client.pexpire(hash, ttl_ms).await?;
        }
    }
    Ok(())
}

/// Redis rejects a zero expiry, so the shortest lifetime is one millisecond.
fn as_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
