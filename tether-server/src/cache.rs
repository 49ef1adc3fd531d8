//! Key-value store available to commands
//!
//! [`ShellCache`] is the pluggable boundary: plain keys with optional expiry,
//! one shared hash namespace, and script evaluation. Every operation defaults
//! to [`TetherError::Unsupported`] so a backend implements only what it can.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use tether_utils::{Result, TetherError};

/// Storage backend for command state
pub trait ShellCache: Send + Sync {
    fn get(&self, _key: &str) -> Result<Option<Value>> {
        Err(TetherError::Unsupported("get"))
    }

    /// Store `value`; `expire` of `None` keeps it until deleted
    fn set(&self, _key: &str, _value: Value, _expire: Option<Duration>) -> Result<bool> {
        Err(TetherError::Unsupported("set"))
    }

    /// Store `value` only if `key` is unset; returns whether it was stored
    fn setnx(&self, _key: &str, _value: Value, _expire: Option<Duration>) -> Result<bool> {
        Err(TetherError::Unsupported("setnx"))
    }

    fn del(&self, _key: &str) -> Result<bool> {
        Err(TetherError::Unsupported("del"))
    }

    fn hget(&self, _field: &str) -> Result<Option<Value>> {
        Err(TetherError::Unsupported("hget"))
    }

    /// Every hash value, ordered by field
    fn hget_all(&self) -> Result<Vec<Value>> {
        Err(TetherError::Unsupported("hget_all"))
    }

    /// Returns whether the field was newly created
    fn hset(&self, _field: &str, _value: Value) -> Result<bool> {
        Err(TetherError::Unsupported("hset"))
    }

    fn hsetnx(&self, _field: &str, _value: Value) -> Result<bool> {
        Err(TetherError::Unsupported("hsetnx"))
    }

    fn hdel(&self, _field: &str) -> Result<bool> {
        Err(TetherError::Unsupported("hdel"))
    }

    fn eval(&self, _script: &str, _keys: &[String], _args: &[String]) -> Result<Value> {
        Err(TetherError::Unsupported("eval"))
    }
}

/// Typed helpers over any [`ShellCache`]
pub trait ShellCacheExt: ShellCache {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)?
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| TetherError::cache(format!("value of '{}': {}", key, e)))
            })
            .transpose()
    }

    fn set_as<T: Serialize>(&self, key: &str, value: &T, expire: Option<Duration>) -> Result<bool> {
        let value = serde_json::to_value(value)
            .map_err(|e| TetherError::cache(format!("value of '{}': {}", key, e)))?;
        self.set(key, value, expire)
    }
}

impl<C: ShellCache + ?Sized> ShellCacheExt for C {}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, expire: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: expire.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process backend; expired keys are dropped when next touched
#[derive(Debug, Default)]
pub struct MemoryCache {
    keys: DashMap<String, Entry>,
    hash: DashMap<String, Value>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live plain keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.keys.iter().filter(|entry| !entry.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&self, key: &str) {
        let now = Instant::now();
        if self.keys.remove_if(key, |_, entry| entry.is_expired(now)).is_some() {
            trace!(key, "Expired cache key");
        }
    }
}

impl ShellCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.evict_expired(key);
        Ok(self.keys.get(key).map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: Value, expire: Option<Duration>) -> Result<bool> {
        self.keys.insert(key.to_string(), Entry::new(value, expire));
        Ok(true)
    }

    fn setnx(&self, key: &str, value: Value, expire: Option<Duration>) -> Result<bool> {
        self.evict_expired(key);
        let mut stored = false;
        self.keys.entry(key.to_string()).or_insert_with(|| {
            stored = true;
            Entry::new(value, expire)
        });
        Ok(stored)
    }

    fn del(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .keys
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    fn hget(&self, field: &str) -> Result<Option<Value>> {
        Ok(self.hash.get(field).map(|entry| entry.value().clone()))
    }

    fn hget_all(&self) -> Result<Vec<Value>> {
        let mut fields: Vec<(String, Value)> = self
            .hash
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(fields.into_iter().map(|(_, value)| value).collect())
    }

    fn hset(&self, field: &str, value: Value) -> Result<bool> {
        Ok(self.hash.insert(field.to_string(), value).is_none())
    }

    fn hsetnx(&self, field: &str, value: Value) -> Result<bool> {
        let mut stored = false;
        self.hash.entry(field.to_string()).or_insert_with(|| {
            stored = true;
            value
        });
        Ok(stored)
    }

    fn hdel(&self, field: &str) -> Result<bool> {
        Ok(self.hash.remove(field).is_some())
    }
}
