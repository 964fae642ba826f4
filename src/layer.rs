//! Cache layers
//!
//! The set of backends is closed: a layer is either in process memory or in
//! the remote store. Adding a backend means adding a [`LayerKind`] variant,
//! a [`CacheLayer`] variant and one arm in [`CacheLayer::build`].

use std::time::Duration;

use crate::{
    CacheError, CacheValue, LayerConfigs, LayerKind, MemoryLayer, MemoryLayerConfig, RemoteLayer,
    RemoteLayerConfig,
};

/// One cache backend with its own configuration and storage
pub enum CacheLayer {
    Memory(MemoryLayer),
    Remote(RemoteLayer),
}

impl CacheLayer {
    /// Build the layer for `kind` from its configuration slot.
    pub fn build(kind: LayerKind, configs: &LayerConfigs) -> Result<Self, CacheError> {
        match kind {
            LayerKind::Memory => Self::memory(configs.memory.as_ref(), kind),
            LayerKind::Remote => Self::remote(configs.remote.as_ref(), kind),
        }
    }

    fn memory(config: Option<&MemoryLayerConfig>, kind: LayerKind) -> Result<Self, CacheError> {
        let config = config.ok_or_else(|| missing_config(kind))?;
        Ok(CacheLayer::Memory(MemoryLayer::new(config.clone())?))
    }

    fn remote(config: Option<&RemoteLayerConfig>, kind: LayerKind) -> Result<Self, CacheError> {
        let config = config.ok_or_else(|| missing_config(kind))?;
        Ok(CacheLayer::Remote(RemoteLayer::new(config.clone())?))
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            CacheLayer::Memory(_) => LayerKind::Memory,
            CacheLayer::Remote(_) => LayerKind::Remote,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        match self {
            CacheLayer::Memory(layer) => Ok(layer.get(key).await),
            CacheLayer::Remote(layer) => layer.get(key).await,
        }
    }

    pub async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        match self {
            CacheLayer::Memory(layer) => {
                layer.set(key, value, ttl).await;
                Ok(())
            }
            CacheLayer::Remote(layer) => layer.set(key, value, ttl).await,
        }
    }

    pub async fn clear(&self, key: &str) -> Result<(), CacheError> {
        match self {
            CacheLayer::Memory(layer) => {
                layer.clear(key).await;
                Ok(())
            }
            CacheLayer::Remote(layer) => layer.clear(key).await,
        }
    }

    pub async fn get_with_namespace(
        &self,
        key: &str,
        namespace: &str,
    ) -> Result<Option<CacheValue>, CacheError> {
        match self {
            CacheLayer::Memory(layer) => Ok(layer.get_with_namespace(key, namespace).await),
            CacheLayer::Remote(layer) => layer.get_with_namespace(key, namespace).await,
        }
    }

    pub async fn set_with_namespace(
        &self,
        key: &str,
        namespace: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        match self {
            CacheLayer::Memory(layer) => {
                layer.set_with_namespace(key, namespace, value, ttl).await;
                Ok(())
            }
            CacheLayer::Remote(layer) => layer.set_with_namespace(key, namespace, value, ttl).await,
        }
    }

    pub async fn clear_with_namespace(&self, key: &str, namespace: &str) -> Result<(), CacheError> {
        match self {
            CacheLayer::Memory(layer) => {
                layer.clear_with_namespace(key, namespace).await;
                Ok(())
            }
            CacheLayer::Remote(layer) => layer.clear_with_namespace(key, namespace).await,
        }
    }
}

fn missing_config(kind: LayerKind) -> CacheError {
    CacheError::config(format!(
        "Layer {kind} provided in order doesn't have associated config"
    ))
}
