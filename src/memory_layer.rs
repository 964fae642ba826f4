//! In-process memory layer
//!
//! A bounded Moka cache with least-recently-used eviction. Each entry carries
//! its own lifetime so that per-call TTL overrides apply to that entry only.

use moka::{Expiry, future::Cache, policy::EvictionPolicy};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

use crate::{CacheError, CacheValue, MemoryLayerConfig};

#[derive(Clone)]
struct StoredValue {
    value: Arc<CacheValue>,
    ttl: Duration,
}

/// Expires every entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        stored: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(stored.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        stored: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(stored.ttl)
    }
}

/// Memory cache layer
pub struct MemoryLayer {
    config: MemoryLayerConfig,
    entries: Cache<String, StoredValue>,
}

impl MemoryLayer {
    pub fn new(config: MemoryLayerConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(PerEntryTtl)
            .build();
        Ok(Self { config, entries })
    }

    pub fn config(&self) -> &MemoryLayerConfig {
        &self.config
    }

    pub async fn get(&self, key: &str) -> Option<CacheValue> {
        match self.entries.get(key).await {
            Some(stored) if !stored.value.is_undefined() => {
                debug!("Memory layer hit for key: {}", key);
                Some(stored.value.as_ref().clone())
            }
            _ => {
                debug!("Memory layer miss for key: {}", key);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) {
        let ttl = self.config.effective_ttl(ttl);
        debug!("Memory layer set for key: {} (ttl {:?})", key, ttl);
        self.entries
            .insert(
                key.to_owned(),
                StoredValue {
                    value: Arc::new(value.clone()),
                    ttl,
                },
            )
            .await;
    }

    pub async fn clear(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    pub async fn get_with_namespace(&self, key: &str, namespace: &str) -> Option<CacheValue> {
        self.get(&namespaced(namespace, key)).await
    }

    pub async fn set_with_namespace(
        &self,
        key: &str,
        namespace: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) {
        self.set(&namespaced(namespace, key), value, ttl).await
    }

    pub async fn clear_with_namespace(&self, key: &str, namespace: &str) {
        self.clear(&namespaced(namespace, key)).await
    }

    /// Number of live entries, after pending evictions have been applied.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

fn namespaced(namespace: &str, key: &str) -> String {
    format!("{namespace}-{key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(ttl_ms: u64) -> MemoryLayer {
        MemoryLayer::new(MemoryLayerConfig::new(Duration::from_millis(ttl_ms))).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_clear() {
        let layer = layer(5_000);
        layer.set("test", &CacheValue::from("toto"), None).await;
        assert_eq!(layer.get("test").await, Some(CacheValue::from("toto")));
        layer.clear("test").await;
        assert_eq!(layer.get("test").await, None);
        // clearing a missing key is fine
        layer.clear("test").await;
    }

    #[tokio::test]
    async fn test_stores_structured_values() {
        let layer = layer(5_000);
        let value = CacheValue::from(json!({"toto": 1, "list": [1, 2]}));
        layer.set("obj", &value, None).await;
        assert_eq!(layer.get("obj").await, Some(value));
    }

    #[tokio::test]
    async fn test_default_ttl_expires() {
        let layer = layer(100);
        layer.set("k", &CacheValue::from(true), None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(layer.get("k").await.is_some());
        tokio::time::sleep(Duration::from_millis(170)).await;
        assert!(layer.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_override_is_scaled_by_multiplier() {
        let layer = MemoryLayer::new(
            MemoryLayerConfig::new(Duration::from_secs(60)).with_ttl_multiplier(2.0),
        )
        .unwrap();
        layer
            .set("k", &CacheValue::from(1i64), Some(Duration::from_millis(100)))
            .await;
        // 100ms * 2 = 200ms
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(layer.get("k").await.is_some());
        tokio::time::sleep(Duration::from_millis(180)).await;
        assert!(layer.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_rewrite_resets_ttl() {
        let layer = layer(5_000);
        layer
            .set("k", &CacheValue::from("short"), Some(Duration::from_millis(50)))
            .await;
        layer.set("k", &CacheValue::from("long"), None).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(layer.get("k").await, Some(CacheValue::from("long")));
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used() {
        let layer = MemoryLayer::new(
            MemoryLayerConfig::new(Duration::from_secs(60)).with_max_entries(2),
        )
        .unwrap();
        layer.set("a", &CacheValue::from(1i64), None).await;
        layer.set("b", &CacheValue::from(2i64), None).await;
        layer.entry_count().await;
        assert!(layer.get("a").await.is_some());
        layer.entry_count().await;
        layer.set("c", &CacheValue::from(3i64), None).await;
        assert_eq!(layer.entry_count().await, 2);
        assert!(layer.get("a").await.is_some());
        assert!(layer.get("b").await.is_none());
        assert!(layer.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_namespaced_keys() {
        let layer = layer(5_000);
        layer
            .set_with_namespace("k", "ns", &CacheValue::from("v"), None)
            .await;
        assert_eq!(layer.get("ns-k").await, Some(CacheValue::from("v")));
        assert_eq!(
            layer.get_with_namespace("k", "ns").await,
            Some(CacheValue::from("v"))
        );
        assert_eq!(layer.get("k").await, None);
        layer.clear_with_namespace("k", "ns").await;
        assert_eq!(layer.get("ns-k").await, None);
    }

    #[tokio::test]
    async fn test_undefined_reads_as_missing() {
        let layer = layer(5_000);
        layer.set("k", &CacheValue::Undefined, None).await;
        assert_eq!(layer.get("k").await, None);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = MemoryLayer::new(MemoryLayerConfig::new(Duration::from_secs(1)).with_max_entries(0))
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}
