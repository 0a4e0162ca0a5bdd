//! Remote KV service primitives
//!
//! The store only ever uses these seven operations. `MemoryKv` is an
//! in-process implementation with the same interface as the production
//! service, used by tests and local runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

/// Result type for KV primitives
pub type KvResult<T> = std::result::Result<T, KvError>;

/// Errors from the remote KV service
#[derive(Debug, Error, Clone)]
pub enum KvError {
    #[error("kv connection failure: {0}")]
    Connection(String),

    #[error("kv operation failed: {0}")]
    Operation(String),
}

/// The KV primitives the session store is built on
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> KvResult<()>;

    /// Delete several keys in one call
    async fn del(&self, keys: &[String]) -> KvResult<()>;

    /// Push onto the head of a list
    async fn lpush(&self, key: &str, value: String) -> KvResult<()>;

    /// Inclusive range of a list; out-of-range indices clamp
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> KvResult<Vec<String>>;

    /// Remove occurrences of `value`; `count` 0 removes all
    async fn lrem(&self, key: &str, count: i64, value: &str) -> KvResult<()>;

    /// Cursor scan of keys matching `pattern` (`prefix*` globs);
    /// a returned cursor of 0 ends the iteration
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> KvResult<(u64, Vec<String>)>;
}

fn key_matches(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

/// In-process KV service double
#[derive(Default)]
pub struct MemoryKv {
    strings: Mutex<HashMap<String, String>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of string keys currently stored
    pub fn string_keys(&self) -> usize {
        self.strings.lock().len()
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.strings.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> KvResult<()> {
        self.strings.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> KvResult<()> {
        let mut strings = self.strings.lock();
        let mut lists = self.lists.lock();
        for key in keys {
            strings.remove(key);
            lists.remove(key);
        }
        Ok(())
    }

    async fn lpush(&self, key: &str, value: String) -> KvResult<()> {
        self.lists
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(0, value);
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> KvResult<Vec<String>> {
        let lists = self.lists.lock();
        let Some(list) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as i64;
        let start = start.max(0).min(len);
        let stop = (stop + 1).max(0).min(len);
        if start >= stop {
            return Ok(Vec::new());
        }
        Ok(list[start as usize..stop as usize].to_vec())
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> KvResult<()> {
        let mut lists = self.lists.lock();
        if let Some(list) = lists.get_mut(key) {
            if count == 0 {
                list.retain(|v| v != value);
            } else if let Some(index) = list.iter().position(|v| v == value) {
                list.remove(index);
            }
            if list.is_empty() {
                lists.remove(key);
            }
        }
        Ok(())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> KvResult<(u64, Vec<String>)> {
        let mut keys: Vec<String> = self
            .strings
            .lock()
            .keys()
            .filter(|k| key_matches(k, pattern))
            .cloned()
            .collect();
        keys.sort();

        let start = cursor as usize;
        if start >= keys.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + count.max(1)).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, keys[start..end].to_vec()))
    }
}
