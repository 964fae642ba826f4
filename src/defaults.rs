//! Default configuration snapshots
//!
//! Instead of a process-wide mutable default, callers hold a
//! [`CacheDefaults`] value and pass it to whatever builds caches. Replacing
//! the default produces a new snapshot; managers built from an older one
//! keep their configuration.

use std::sync::Arc;

use crate::{CacheError, LayerManager, ManagerConfig, ManagerOverrides, Memoized};

/// Immutable snapshot of the default [`ManagerConfig`]
#[derive(Debug, Clone, Default)]
pub struct CacheDefaults {
    config: Arc<ManagerConfig>,
}

/// Produce a new default snapshot from `config`.
pub fn use_as_default(config: ManagerConfig) -> CacheDefaults {
    CacheDefaults::new(config)
}

impl CacheDefaults {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The default configuration with `overrides` folded on top.
    pub fn resolve(&self, overrides: Option<&ManagerOverrides>) -> Result<ManagerConfig, CacheError> {
        match overrides {
            Some(overrides) => self.config.merged(overrides),
            None => Ok(self.config.as_ref().clone()),
        }
    }

    /// A key/value store built from the resolved configuration.
    pub fn store(&self, overrides: Option<&ManagerOverrides>) -> Result<LayerManager, CacheError> {
        LayerManager::new(&self.resolve(overrides)?)
    }

    /// Memoize `func` with the resolved configuration.
    pub fn memoize<F>(
        &self,
        name: impl Into<String>,
        func: F,
        overrides: Option<&ManagerOverrides>,
    ) -> Result<Memoized<F>, CacheError> {
        Memoized::new(name, func, &self.resolve(overrides)?)
    }
}
