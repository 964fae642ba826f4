//! Cache configuration
//!
//! A [`ManagerConfig`] lists the layers to build, in read order, and holds one
//! configuration slot per layer kind. Configurations are plain values: they
//! are cloned into managers at construction and never change afterwards.
//!
//! Partial per-call settings are expressed as [`ManagerOverrides`] and folded
//! onto a base configuration by [`ManagerConfig::merged`]:
//!
//! - scalar fields replace the base value when set
//! - `layer_order` replaces the base order, it is never appended to
//! - reference fields (`client`, `key_hasher`) come from the most specific
//!   source that sets them
//! - a layer slot missing from the base is created from the override, which
//!   must then carry the fields that have no default (`ttl`, and
//!   `shallow_errors` for the remote layer)

use serde::Deserialize;
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use crate::{CacheError, RemoteClient};

/// Hashes serialized call arguments into a cache key.
pub type KeyHasher = Arc<dyn Fn(&serde_json::Value) -> String + Send + Sync>;

/// Default lifetime of the memory layer in the default configuration
pub const DEFAULT_TTL: Duration = Duration::from_secs(15);

/// Default capacity of a memory layer
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// The kinds of layer a manager can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum LayerKind {
    Memory,
    Remote,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Memory => "memory",
            LayerKind::Remote => "remote",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = CacheError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.to_ascii_lowercase().as_str() {
            "memory" => Ok(LayerKind::Memory),
            "remote" | "redis" => Ok(LayerKind::Remote),
            _ => Err(CacheError::config(format!("Invalid layer ({tag}) provided"))),
        }
    }
}

impl TryFrom<String> for LayerKind {
    type Error = CacheError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

/// TTL applied by a layer: the per-call override scaled by the layer's
/// multiplier, or the layer default when there is no override.
pub(crate) fn effective_ttl(
    default: Duration,
    multiplier: f64,
    ttl_override: Option<Duration>,
) -> Duration {
    match ttl_override {
        Some(ttl) => Duration::try_from_secs_f64(ttl.as_secs_f64() * multiplier)
            .unwrap_or(Duration::MAX),
        None => default,
    }
}

fn validate_multiplier(kind: LayerKind, multiplier: f64) -> Result<(), CacheError> {
    if multiplier.is_finite() && multiplier >= 0.0 {
        Ok(())
    } else {
        Err(CacheError::config(format!(
            "Layer {kind} has an invalid ttl multiplier ({multiplier})"
        )))
    }
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_max_entries() -> u64 {
    DEFAULT_MAX_ENTRIES
}

/// Configuration of the in-process memory layer
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryLayerConfig {
    /// Default lifetime of entries
    #[serde(with = "millis")]
    pub ttl: Duration,
    /// Scales per-call TTL overrides for this layer only
    #[serde(default = "default_multiplier")]
    pub ttl_multiplier: f64,
    /// Maximum number of entries before least-recently-used eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl MemoryLayerConfig {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ttl_multiplier: default_multiplier(),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn with_ttl_multiplier(mut self, multiplier: f64) -> Self {
        self.ttl_multiplier = multiplier;
        self
    }

    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn effective_ttl(&self, ttl_override: Option<Duration>) -> Duration {
        effective_ttl(self.ttl, self.ttl_multiplier, ttl_override)
    }

    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        validate_multiplier(LayerKind::Memory, self.ttl_multiplier)?;
        if self.max_entries == 0 {
            return Err(CacheError::config("Memory layer needs max_entries > 0"));
        }
        Ok(())
    }
}

/// Configuration of the remote (Redis) layer
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteLayerConfig {
    /// Default lifetime of entries
    #[serde(with = "millis")]
    pub ttl: Duration,
    /// Scales per-call TTL overrides for this layer only
    #[serde(default = "default_multiplier")]
    pub ttl_multiplier: f64,
    /// Budget for a single read; unbounded when `None`
    #[serde(default, with = "millis_opt")]
    pub timeout: Option<Duration>,
    /// Swallow backend errors (reads become misses, writes silently fail)
    pub shallow_errors: bool,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Store keys as fields of one hash per namespace + prefix
    #[serde(default)]
    pub use_hashmap: bool,
    /// Shared client handle; attached in code, never loaded from a file
    #[serde(skip)]
    pub client: Option<Arc<dyn RemoteClient>>,
}

impl RemoteLayerConfig {
    /// There is no default error policy: callers pick `shallow_errors`.
    pub fn new(ttl: Duration, shallow_errors: bool) -> Self {
        Self {
            ttl,
            ttl_multiplier: default_multiplier(),
            timeout: None,
            shallow_errors,
            prefix: None,
            namespace: None,
            use_hashmap: false,
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn RemoteClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_ttl_multiplier(mut self, multiplier: f64) -> Self {
        self.ttl_multiplier = multiplier;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_hashmap(mut self, use_hashmap: bool) -> Self {
        self.use_hashmap = use_hashmap;
        self
    }

    pub fn effective_ttl(&self, ttl_override: Option<Duration>) -> Duration {
        effective_ttl(self.ttl, self.ttl_multiplier, ttl_override)
    }

    pub(crate) fn validate(&self) -> Result<(), CacheError> {
        validate_multiplier(LayerKind::Remote, self.ttl_multiplier)
    }
}

impl fmt::Debug for RemoteLayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLayerConfig")
            .field("ttl", &self.ttl)
            .field("ttl_multiplier", &self.ttl_multiplier)
            .field("timeout", &self.timeout)
            .field("shallow_errors", &self.shallow_errors)
            .field("prefix", &self.prefix)
            .field("namespace", &self.namespace)
            .field("use_hashmap", &self.use_hashmap)
            .field("client", &self.client.as_ref().map(|_| "<client>"))
            .finish()
    }
}

/// One configuration slot per layer kind
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfigs {
    #[serde(default)]
    pub memory: Option<MemoryLayerConfig>,
    #[serde(default, alias = "redis")]
    pub remote: Option<RemoteLayerConfig>,
}

/// Configuration of a [`LayerManager`](crate::LayerManager)
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    /// Layers to build, in read order. A kind may appear more than once; every
    /// occurrence shares the kind's configuration slot.
    pub layer_order: Vec<LayerKind>,
    #[serde(default)]
    pub layer_configs: LayerConfigs,
    /// Custom hash for memoized call arguments
    #[serde(skip)]
    pub key_hasher: Option<KeyHasher>,
}

impl Default for ManagerConfig {
    /// Memory only, 15 second TTL
    fn default() -> Self {
        Self::memory_only(MemoryLayerConfig::new(DEFAULT_TTL))
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("layer_order", &self.layer_order)
            .field("layer_configs", &self.layer_configs)
            .field("key_hasher", &self.key_hasher.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ManagerConfig {
    pub fn new(layer_order: Vec<LayerKind>, layer_configs: LayerConfigs) -> Self {
        Self {
            layer_order,
            layer_configs,
            key_hasher: None,
        }
    }

    pub fn memory_only(memory: MemoryLayerConfig) -> Self {
        Self::new(
            vec![LayerKind::Memory],
            LayerConfigs {
                memory: Some(memory),
                remote: None,
            },
        )
    }

    /// Memory first, remote second: the usual two-tier setup.
    pub fn memory_then_remote(memory: MemoryLayerConfig, remote: RemoteLayerConfig) -> Self {
        Self::new(
            vec![LayerKind::Memory, LayerKind::Remote],
            LayerConfigs {
                memory: Some(memory),
                remote: Some(remote),
            },
        )
    }

    /// Load a declarative configuration from JSON. Durations are integer
    /// milliseconds; attach a remote client afterwards with
    /// [`with_remote_client`](Self::with_remote_client).
    ///
    /// ```json
    /// {
    ///   "layer_order": ["memory", "remote"],
    ///   "layer_configs": {
    ///     "memory": { "ttl": 5000, "max_entries": 1000 },
    ///     "remote": { "ttl": 60000, "timeout": 50, "shallow_errors": true, "prefix": "users:" }
    ///   }
    /// }
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, CacheError> {
        serde_json::from_str(json).map_err(|e| CacheError::config(e.to_string()))
    }

    /// Attach a client to the remote slot. No-op when there is no remote slot.
    pub fn with_remote_client(mut self, client: Arc<dyn RemoteClient>) -> Self {
        if let Some(remote) = self.layer_configs.remote.as_mut() {
            remote.client = Some(client);
        }
        self
    }

    pub fn with_key_hasher(mut self, hasher: KeyHasher) -> Self {
        self.key_hasher = Some(hasher);
        self
    }

    /// Fold `overrides` onto this configuration, returning a new one.
    pub fn merged(&self, overrides: &ManagerOverrides) -> Result<ManagerConfig, CacheError> {
        let memory = match &overrides.memory {
            Some(o) => Some(o.apply(self.layer_configs.memory.as_ref())?),
            None => self.layer_configs.memory.clone(),
        };
        let remote = match &overrides.remote {
            Some(o) => Some(o.apply(self.layer_configs.remote.as_ref())?),
            None => self.layer_configs.remote.clone(),
        };
        Ok(ManagerConfig {
            layer_order: overrides
                .layer_order
                .clone()
                .unwrap_or_else(|| self.layer_order.clone()),
            layer_configs: LayerConfigs { memory, remote },
            key_hasher: overrides
                .key_hasher
                .clone()
                .or_else(|| self.key_hasher.clone()),
        })
    }
}

/// Partial configuration applied on top of a base [`ManagerConfig`]
#[derive(Clone, Default)]
pub struct ManagerOverrides {
    pub layer_order: Option<Vec<LayerKind>>,
    pub memory: Option<MemoryLayerOverrides>,
    pub remote: Option<RemoteLayerOverrides>,
    pub key_hasher: Option<KeyHasher>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLayerOverrides {
    pub ttl: Option<Duration>,
    pub ttl_multiplier: Option<f64>,
    pub max_entries: Option<u64>,
}

impl MemoryLayerOverrides {
    fn apply(&self, base: Option<&MemoryLayerConfig>) -> Result<MemoryLayerConfig, CacheError> {
        let mut config = match base {
            Some(base) => base.clone(),
            None => MemoryLayerConfig::new(self.ttl.ok_or_else(|| {
                CacheError::config("memory layer override needs a ttl when no default exists")
            })?),
        };
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        if let Some(multiplier) = self.ttl_multiplier {
            config.ttl_multiplier = multiplier;
        }
        if let Some(max_entries) = self.max_entries {
            config.max_entries = max_entries;
        }
        Ok(config)
    }
}

#[derive(Clone, Default)]
pub struct RemoteLayerOverrides {
    pub ttl: Option<Duration>,
    pub ttl_multiplier: Option<f64>,
    pub timeout: Option<Duration>,
    pub shallow_errors: Option<bool>,
    pub prefix: Option<String>,
    pub namespace: Option<String>,
    pub use_hashmap: Option<bool>,
    pub client: Option<Arc<dyn RemoteClient>>,
}

impl RemoteLayerOverrides {
    fn apply(&self, base: Option<&RemoteLayerConfig>) -> Result<RemoteLayerConfig, CacheError> {
        let mut config = match base {
            Some(base) => base.clone(),
            None => match (self.ttl, self.shallow_errors) {
                (Some(ttl), Some(shallow_errors)) => RemoteLayerConfig::new(ttl, shallow_errors),
                _ => {
                    return Err(CacheError::config(
                        "remote layer override needs ttl and shallow_errors when no default exists",
                    ));
                }
            },
        };
        if let Some(ttl) = self.ttl {
            config.ttl = ttl;
        }
        if let Some(multiplier) = self.ttl_multiplier {
            config.ttl_multiplier = multiplier;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(shallow_errors) = self.shallow_errors {
            config.shallow_errors = shallow_errors;
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = Some(prefix.clone());
        }
        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone());
        }
        if let Some(use_hashmap) = self.use_hashmap {
            config.use_hashmap = use_hashmap;
        }
        if let Some(client) = &self.client {
            config.client = Some(Arc::clone(client));
        }
        Ok(config)
    }
}

/// Durations as integer milliseconds
mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_millis)
    }
}

mod millis_opt {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(de)?.map(Duration::from_millis))
    }
}
