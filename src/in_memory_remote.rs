//! In-process stand-in for the remote store
//!
//! Implements the [`RemoteClient`] contract against a map guarded by a tokio
//! mutex, with millisecond expiry. Tests use the two injection hooks to
//! exercise the remote layer's failure handling:
//!
//! - [`InMemoryRemote::pause`] delays every command by a fixed latency
//! - [`InMemoryRemote::set_failing`] makes every command fail with an I/O error

use async_trait::async_trait;
use redis::{ErrorKind, RedisError, RedisResult};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tokio::sync::Mutex;

use crate::RemoteClient;

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct Keyspace {
    strings: HashMap<String, Expiring<String>>,
    hashes: HashMap<String, Expiring<HashMap<String, String>>>,
}

impl Keyspace {
    /// Drop `key` if it has expired
    fn evict_expired(&mut self, key: &str, now: Instant) {
        if self.strings.get(key).is_some_and(|e| !e.is_live(now)) {
            self.strings.remove(key);
        }
        if self.hashes.get(key).is_some_and(|e| !e.is_live(now)) {
            self.hashes.remove(key);
        }
    }
}

/// In-memory implementation of [`RemoteClient`].
#[derive(Default)]
pub struct InMemoryRemote {
    keyspace: Mutex<Keyspace>,
    latency_ms: AtomicU64,
    failing: AtomicBool,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent command by `latency`.
    pub fn pause(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Remove any latency set by [`pause`](Self::pause).
    pub fn resume(&self) {
        self.latency_ms.store(0, Ordering::SeqCst);
    }

    /// Make every subsequent command fail (or stop failing).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Whether a live top-level key (string or hash) exists.
    pub async fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.evict_expired(key, now);
        keyspace.strings.contains_key(key) || keyspace.hashes.contains_key(key)
    }

    /// Remaining lifetime of a key, if it exists and has an expiry.
    pub async fn pttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.evict_expired(key, now);
        let expires_at = match keyspace.strings.get(key) {
            Some(entry) => entry.expires_at,
            None => keyspace.hashes.get(key)?.expires_at,
        };
        expires_at.map(|at| at.saturating_duration_since(now))
    }

    async fn simulate(&self) -> RedisResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RedisError::from((
                ErrorKind::IoError,
                "simulated connection failure",
            )));
        }
        Ok(())
    }
}

fn wrong_type() -> RedisError {
    RedisError::from((
        ErrorKind::TypeError,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    ))
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        self.simulate().await?;
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.evict_expired(key, now);
        if keyspace.hashes.contains_key(key) {
            return Err(wrong_type());
        }
        Ok(keyspace.strings.get(key).map(|e| e.value.clone()))
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RedisResult<()> {
        self.simulate().await?;
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.hashes.remove(key);
        keyspace.strings.insert(
            key.to_owned(),
            Expiring {
                value: value.to_owned(),
                expires_at: Some(now + Duration::from_millis(ttl_ms)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> RedisResult<u64> {
        self.simulate().await?;
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.evict_expired(key, now);
        let removed = keyspace.strings.remove(key).is_some() || keyspace.hashes.remove(key).is_some();
        Ok(u64::from(removed))
    }

    async fn hget(&self, key: &str, field: &str) -> RedisResult<Option<String>> {
        self.simulate().await?;
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.evict_expired(key, now);
        if keyspace.strings.contains_key(key) {
            return Err(wrong_type());
        }
        Ok(keyspace
            .hashes
            .get(key)
            .and_then(|e| e.value.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> RedisResult<()> {
        self.simulate().await?;
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.evict_expired(key, now);
        if keyspace.strings.contains_key(key) {
            return Err(wrong_type());
        }
        keyspace
            .hashes
            .entry(key.to_owned())
            .or_insert_with(|| Expiring {
                value: HashMap::new(),
                expires_at: None,
            })
            .value
            .insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> RedisResult<u64> {
        self.simulate().await?;
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        keyspace.evict_expired(key, now);
        if keyspace.strings.contains_key(key) {
            return Err(wrong_type());
        }
        let Some(hash) = keyspace.hashes.get_mut(key) else {
            return Ok(0);
        };
        let removed = hash.value.remove(field).is_some();
        if hash.value.is_empty() {
            keyspace.hashes.remove(key);
        }
        Ok(u64::from(removed))
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> RedisResult<bool> {
        self.simulate().await?;
        let now = Instant::now();
        let expires_at = Some(now + Duration::from_millis(ttl_ms));
        let mut keyspace = self.keyspace.lock().await;
        keyspace.evict_expired(key, now);
        if let Some(entry) = keyspace.strings.get_mut(key) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        if let Some(entry) = keyspace.hashes.get_mut(key) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        Ok(false)
    }
}
