//! layercache - Multi-layer read-through cache
//!
//! This library provides an ordered chain of cache layers behind a single
//! get/set/clear surface:
//! - Memory: in-process Moka cache, bounded with LRU eviction
//! - Remote: Redis, shared across instances
//!
//! The cache supports:
//! - Read fallback through the layers in configured order
//! - Writes and clears fanned out to every layer, in order
//! - Per-layer TTLs, with per-call overrides scaled by a per-layer multiplier
//! - Namespaced and prefixed remote keys, optionally packed into Redis hashes
//! - Timeout-bounded remote reads and optional shallowing of backend errors
//! - Memoization of async functions by argument hash

pub mod codec;
mod config;
mod defaults;
mod error;
#[cfg(any(test, feature = "testing"))]
mod in_memory_remote;
mod layer;
mod manager;
mod memoize;
mod memory_layer;
mod remote_client;
mod remote_layer;
mod value;

pub use config::{
    DEFAULT_MAX_ENTRIES, DEFAULT_TTL, KeyHasher, LayerConfigs, LayerKind, ManagerConfig,
    ManagerOverrides, MemoryLayerConfig, MemoryLayerOverrides, RemoteLayerConfig,
    RemoteLayerOverrides,
};
pub use defaults::{CacheDefaults, use_as_default};
pub use error::CacheError;
#[cfg(any(test, feature = "testing"))]
pub use in_memory_remote::InMemoryRemote;
pub use layer::CacheLayer;
pub use manager::LayerManager;
pub use memoize::{Memoized, default_key_hasher};
pub use memory_layer::MemoryLayer;
pub use remote_client::{RemoteClient, connect};
pub use remote_layer::RemoteLayer;
pub use value::CacheValue;

// Re-export async_trait for implementing RemoteClient
pub use async_trait::async_trait;
