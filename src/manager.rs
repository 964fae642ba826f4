//! Layer manager
//!
//! Owns the ordered layers built from a [`ManagerConfig`]:
//!
//! - reads try each layer in order and return the first hit; a hit in a
//!   later layer is not copied into earlier ones
//! - writes and clears go to every layer in order, each awaited before the
//!   next; the first error that a layer does not shallow stops the fan-out
//!   and is returned unchanged

use std::time::Duration;
use tracing::debug;

use crate::{CacheError, CacheLayer, CacheValue, ManagerConfig};

/// Ordered chain of cache layers behind one get/set/clear surface
pub struct LayerManager {
    layers: Vec<CacheLayer>,
}

impl LayerManager {
    /// Validate `config` and build every layer. There is no partially built
    /// manager: any configuration error fails construction.
    pub fn new(config: &ManagerConfig) -> Result<Self, CacheError> {
        if config.layer_order.is_empty() {
            return Err(CacheError::config("No layer has been defined"));
        }
        let layers = config
            .layer_order
            .iter()
            .map(|kind| CacheLayer::build(*kind, &config.layer_configs))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "Built layer manager with layers: {:?}",
            config.layer_order
        );
        Ok(Self { layers })
    }

    /// The layers, in read order.
    pub fn layers(&self) -> &[CacheLayer] {
        &self.layers
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        for (index, layer) in self.layers.iter().enumerate() {
            if let Some(value) = layer.get(key).await? {
                debug!("Cache hit in layer {} ({}) for key: {}", index, layer.kind(), key);
                return Ok(Some(value));
            }
        }
        debug!("Cache miss in every layer for key: {}", key);
        Ok(None)
    }

    /// Write to every layer. `ttl` overrides each layer's default lifetime,
    /// scaled by that layer's multiplier.
    pub async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        for layer in &self.layers {
            layer.set(key, value, ttl).await?;
        }
        Ok(())
    }

    pub async fn clear(&self, key: &str) -> Result<(), CacheError> {
        for layer in &self.layers {
            layer.clear(key).await?;
        }
        Ok(())
    }

    pub async fn get_with_namespace(
        &self,
        key: &str,
        namespace: &str,
    ) -> Result<Option<CacheValue>, CacheError> {
        for layer in &self.layers {
            if let Some(value) = layer.get_with_namespace(key, namespace).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    pub async fn set_with_namespace(
        &self,
        key: &str,
        namespace: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        for layer in &self.layers {
            layer.set_with_namespace(key, namespace, value, ttl).await?;
        }
        Ok(())
    }

    pub async fn clear_with_namespace(&self, key: &str, namespace: &str) -> Result<(), CacheError> {
        for layer in &self.layers {
            layer.clear_with_namespace(key, namespace).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        InMemoryRemote, LayerConfigs, LayerKind, MemoryLayerConfig, RemoteClient,
        RemoteLayerConfig,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn memory_config(ttl_ms: u64) -> MemoryLayerConfig {
        MemoryLayerConfig::new(Duration::from_millis(ttl_ms))
    }

    fn two_tier(remote: &Arc<InMemoryRemote>, shallow_errors: bool) -> LayerManager {
        let client: Arc<dyn RemoteClient> = Arc::clone(remote) as Arc<dyn RemoteClient>;
        LayerManager::new(&ManagerConfig::memory_then_remote(
            memory_config(5_000),
            RemoteLayerConfig::new(Duration::from_secs(5), shallow_errors).with_client(client),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let manager = LayerManager::new(&ManagerConfig::default()).unwrap();
        for (i, value) in [
            CacheValue::from("toto"),
            CacheValue::from(json!({"a": [1, 2, {"b": null}]})),
            CacheValue::Bytes(vec![1, 2, 3]),
        ]
        .into_iter()
        .enumerate()
        {
            let key = format!("k{i}");
            manager.set(&key, &value, None).await.unwrap();
            assert_eq!(manager.get(&key).await.unwrap(), Some(value));
        }
    }

    #[test]
    fn test_empty_order_is_rejected() {
        let config = ManagerConfig::new(vec![], LayerConfigs::default());
        let err = LayerManager::new(&config).err().unwrap();
        assert!(matches!(err, CacheError::Configuration(ref m) if m.contains("No layer")));
    }

    #[test]
    fn test_missing_slot_is_rejected() {
        let config = ManagerConfig::new(
            vec![LayerKind::Memory, LayerKind::Remote],
            LayerConfigs {
                memory: Some(memory_config(1_000)),
                remote: None,
            },
        );
        let err = LayerManager::new(&config).err().unwrap();
        assert!(matches!(err, CacheError::Configuration(ref m) if m.contains("remote")));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = ManagerConfig::from_json_str(
            r#"{ "layer_order": ["memory", "filesystem"], "layer_configs": { "memory": { "ttl": 10 } } }"#,
        )
        .and_then(|config| LayerManager::new(&config))
        .err()
        .unwrap();
        assert!(matches!(err, CacheError::Configuration(ref m) if m.contains("filesystem")));
    }

    #[test]
    fn test_invalid_multiplier_is_rejected() {
        let config =
            ManagerConfig::memory_only(memory_config(1_000).with_ttl_multiplier(f64::NAN));
        assert!(matches!(
            LayerManager::new(&config),
            Err(CacheError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_same_kind_twice_shares_slot() {
        let config = ManagerConfig::new(
            vec![LayerKind::Memory, LayerKind::Memory],
            LayerConfigs {
                memory: Some(memory_config(5_000).with_max_entries(1)),
                remote: None,
            },
        );
        let manager = LayerManager::new(&config).unwrap();
        assert_eq!(manager.layers().len(), 2);
        assert!(manager.layers().iter().all(|l| l.kind() == LayerKind::Memory));

        manager.set("test", &CacheValue::from("toto"), None).await.unwrap();
        for layer in manager.layers() {
            assert_eq!(layer.get("test").await.unwrap(), Some(CacheValue::from("toto")));
            let CacheLayer::Memory(memory) = layer else {
                panic!("expected a memory layer");
            };
            assert_eq!(memory.config().max_entries, 1);
        }
    }

    #[tokio::test]
    async fn test_set_writes_every_layer() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = two_tier(&remote, false);
        manager.set("k", &CacheValue::from("v"), None).await.unwrap();
        for layer in manager.layers() {
            assert_eq!(layer.get("k").await.unwrap(), Some(CacheValue::from("v")));
        }
        assert!(remote.contains_key("k").await);
    }

    #[tokio::test]
    async fn test_fallback_without_backfill() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = two_tier(&remote, false);
        manager.layers()[1]
            .set("only-remote", &CacheValue::from(7i64), None)
            .await
            .unwrap();

        assert_eq!(
            manager.get("only-remote").await.unwrap(),
            Some(CacheValue::from(7i64))
        );
        assert_eq!(manager.layers()[0].get("only-remote").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_layer_wins() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = two_tier(&remote, false);
        manager.layers()[0]
            .set("k", &CacheValue::from("memory"), None)
            .await
            .unwrap();
        manager.layers()[1]
            .set("k", &CacheValue::from("remote"), None)
            .await
            .unwrap();
        assert_eq!(manager.get("k").await.unwrap(), Some(CacheValue::from("memory")));

        // a hit in the first layer never touches the second
        remote.set_failing(true);
        assert_eq!(manager.get("k").await.unwrap(), Some(CacheValue::from("memory")));
    }

    #[tokio::test]
    async fn test_miss_everywhere() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = two_tier(&remote, false);
        assert_eq!(manager.get("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_every_layer() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = two_tier(&remote, false);
        manager.set("k", &CacheValue::from(1i64), None).await.unwrap();
        manager.clear("k").await.unwrap();
        for layer in manager.layers() {
            assert_eq!(layer.get("k").await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_remote_failure_aborts_fan_out() {
        let remote = Arc::new(InMemoryRemote::new());
        let client: Arc<dyn RemoteClient> = Arc::clone(&remote) as Arc<dyn RemoteClient>;
        // remote first, memory second
        let config = ManagerConfig::new(
            vec![LayerKind::Remote, LayerKind::Memory],
            LayerConfigs {
                memory: Some(memory_config(5_000)),
                remote: Some(
                    RemoteLayerConfig::new(Duration::from_secs(5), false).with_client(client),
                ),
            },
        );
        let manager = LayerManager::new(&config).unwrap();
        remote.set_failing(true);

        let err = manager
            .set("k", &CacheValue::from(1i64), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Redis(_)));
        assert_eq!(manager.layers()[1].get("k").await.unwrap(), None);
        assert!(manager.get("k").await.is_err());
    }

    #[tokio::test]
    async fn test_shallowed_remote_failure_falls_through() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = two_tier(&remote, true);
        remote.set_failing(true);
        manager.set("k", &CacheValue::from(1i64), None).await.unwrap();
        assert_eq!(manager.get("k").await.unwrap(), Some(CacheValue::from(1i64)));
        assert_eq!(manager.get("absent").await.unwrap(), None);
        manager.clear("k").await.unwrap();
        assert_eq!(manager.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_override_per_layer_multiplier() {
        let remote = Arc::new(InMemoryRemote::new());
        let client: Arc<dyn RemoteClient> = Arc::clone(&remote) as Arc<dyn RemoteClient>;
        let manager = LayerManager::new(&ManagerConfig::memory_then_remote(
            memory_config(60_000),
            RemoteLayerConfig::new(Duration::from_secs(60), false)
                .with_ttl_multiplier(3.0)
                .with_client(client),
        ))
        .unwrap();
        manager
            .set("k", &CacheValue::from(true), Some(Duration::from_millis(100)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(180)).await;
        // memory entry (100ms) is gone, remote (300ms) still serves it
        assert_eq!(manager.layers()[0].get("k").await.unwrap(), None);
        assert_eq!(manager.get("k").await.unwrap(), Some(CacheValue::from(true)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_namespaced_fan_out() {
        let remote = Arc::new(InMemoryRemote::new());
        let manager = two_tier(&remote, false);
        manager
            .set_with_namespace("k", "ns:", &CacheValue::from("v"), None)
            .await
            .unwrap();
        assert!(remote.contains_key("ns:k").await);
        assert_eq!(
            manager.layers()[0].get("ns:-k").await.unwrap(),
            Some(CacheValue::from("v"))
        );
        assert_eq!(
            manager.get_with_namespace("k", "ns:").await.unwrap(),
            Some(CacheValue::from("v"))
        );
        assert_eq!(manager.get("k").await.unwrap(), None);

        manager.clear_with_namespace("k", "ns:").await.unwrap();
        assert_eq!(manager.get_with_namespace("k", "ns:").await.unwrap(), None);
    }
}
