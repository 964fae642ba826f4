//! Memoization of async functions
//!
//! [`Memoized`] pairs a function with the [`LayerManager`] that caches its
//! results. Calls are keyed by a hash of their JSON-serialized arguments.
//! Only successful results are cached; a failed cache write is logged and
//! does not affect the returned value.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::{future::Future, sync::Arc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{CacheError, CacheValue, KeyHasher, LayerManager, ManagerConfig};

/// SHA-256 of the serialized arguments, base64 encoded.
pub fn default_key_hasher(args: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(args.to_string().as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// An async function whose results are cached by argument hash
pub struct Memoized<F> {
    name: String,
    func: F,
    manager: Arc<LayerManager>,
    key_hasher: KeyHasher,
}

impl<F> Memoized<F> {
    /// Wrap `func`, building its manager from `config`.
    ///
    /// When the configuration has a remote layer without a prefix, keys are
    /// prefixed with `"<name>:"` (or a random prefix for an empty name) so
    /// that different functions sharing a store do not collide.
    pub fn new(name: impl Into<String>, func: F, config: &ManagerConfig) -> Result<Self, CacheError> {
        let name = name.into();
        let mut config = config.clone();
        if let Some(remote) = config.layer_configs.remote.as_mut()
            && remote.prefix.is_none()
        {
            let prefix = if name.is_empty() {
                random_prefix()
            } else {
                format!("{name}:")
            };
            remote.prefix = Some(prefix);
        }

        let manager = LayerManager::new(&config)?;
        let key_hasher = config
            .key_hasher
            .clone()
            .unwrap_or_else(|| Arc::new(default_key_hasher));

        Ok(Self {
            name,
            func,
            manager: Arc::new(manager),
            key_hasher,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The manager holding this function's results.
    pub fn manager(&self) -> &Arc<LayerManager> {
        &self.manager
    }

    /// The cache key used for a call with `args`.
    pub fn key_for<A: Serialize>(&self, args: &A) -> Result<String, CacheError> {
        let args = serde_json::to_value(args)?;
        Ok((self.key_hasher)(&args))
    }

    /// Return the cached result for `args`, or run the function and cache it.
    pub async fn call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: Serialize,
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
    {
        let key = self.key_for(&args)?;

        if let Some(cached) = self.manager.get(&key).await? {
            match cached.deserialize::<T>() {
                Ok(value) => {
                    debug!("Memoized {} served from cache for key: {}", self.name, key);
                    return Ok(value);
                }
                Err(e) => warn!(
                    "Memoized {} found an unreadable cached value for key {} ({}). Recomputing.",
                    self.name, key, e
                ),
            }
        }

        let result = (self.func)(args).await?;

        match CacheValue::from_serialize(&result) {
            Ok(value) => {
                if let Err(e) = self.manager.set(&key, &value, None).await {
                    warn!(
                        "Memoized {} failed to cache result for key {}: {}",
                        self.name, key, e
                    );
                }
            }
            Err(e) => warn!(
                "Memoized {} could not encode result for key {}: {}",
                self.name, key, e
            ),
        }
        Ok(result)
    }
}

fn random_prefix() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}:", &id[..11])
}
