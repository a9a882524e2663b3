//! Cache storage trait and in-memory implementation.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use super::policy::Category;

/// A single stored cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub category: Category,
  /// Serialized JSON value
  pub data: Vec<u8>,
  pub stored_at: Instant,
}

/// Metadata about a stored entry, without its payload.
#[derive(Debug, Clone)]
pub struct EntryMeta {
  pub key: String,
  pub category: Category,
  pub stored_at: Instant,
}

/// Trait for cache storage backends.
///
/// Only `write` may fail (a bounded backend running out of room). The store
/// treats every failure as best-effort and never surfaces it to callers.
pub trait CacheStorage: Send + Sync {
  fn read(&self, key: &str) -> Option<CacheEntry>;

  /// Insert or replace an entry.
  fn write(&self, key: &str, entry: CacheEntry) -> Result<()>;

  /// Remove an entry, returning whether it existed.
  fn remove(&self, key: &str) -> bool;

  /// Metadata for every stored entry.
  fn entries(&self) -> Vec<EntryMeta>;

  /// Remove everything, returning the number of entries dropped.
  fn clear(&self) -> usize;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn read(&self, _key: &str) -> Option<CacheEntry> {
    None // Always miss
  }

  fn write(&self, _key: &str, _entry: CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> bool {
    false
  }

  fn entries(&self) -> Vec<EntryMeta> {
    Vec::new()
  }

  fn clear(&self) -> usize {
    0
  }
}

/// In-memory storage with an optional byte quota.
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, CacheEntry>>,
  quota_bytes: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      quota_bytes: None,
    }
  }

  /// Limit the total payload size held by this storage.
  pub fn with_quota(mut self, quota_bytes: usize) -> Self {
    self.quota_bytes = Some(quota_bytes);
    self
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Default for MemoryStorage {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStorage for MemoryStorage {
  fn read(&self, key: &str) -> Option<CacheEntry> {
    self.lock().get(key).cloned()
  }

  fn write(&self, key: &str, entry: CacheEntry) -> Result<()> {
    let mut entries = self.lock();

    if let Some(quota) = self.quota_bytes {
      let used: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(_, e)| e.data.len())
        .sum();
      if used + entry.data.len() > quota {
        return Err(eyre!(
          "Cache quota exceeded writing {}: {} + {} bytes > {}",
          key,
          used,
          entry.data.len(),
          quota
        ));
      }
    }

    entries.insert(key.to_string(), entry);
    Ok(())
  }

  fn remove(&self, key: &str) -> bool {
    self.lock().remove(key).is_some()
  }

  fn entries(&self) -> Vec<EntryMeta> {
    self
      .lock()
      .iter()
      .map(|(key, entry)| EntryMeta {
        key: key.clone(),
        category: entry.category,
        stored_at: entry.stored_at,
      })
      .collect()
  }

  fn clear(&self) -> usize {
    let mut entries = self.lock();
    let count = entries.len();
    entries.clear();
    count
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(bytes: usize) -> CacheEntry {
    CacheEntry {
      category: Category::Default,
      data: vec![b'x'; bytes],
      stored_at: Instant::now(),
    }
  }

  #[tokio::test]
  async fn test_memory_roundtrip() {
    let storage = MemoryStorage::new();
    storage.write("a", entry(3)).unwrap();

    assert_eq!(storage.read("a").map(|e| e.data.len()), Some(3));
    assert_eq!(storage.entries().len(), 1);
    assert!(storage.remove("a"));
    assert!(!storage.remove("a"));
    assert!(storage.read("a").is_none());
  }

  #[tokio::test]
  async fn test_quota_rejects_oversized_write() {
    let storage = MemoryStorage::new().with_quota(10);
    storage.write("a", entry(6)).unwrap();

    assert!(storage.write("b", entry(6)).is_err());
    // Replacing an existing key only counts the new payload
    assert!(storage.write("a", entry(10)).is_ok());
  }

  #[tokio::test]
  async fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.write("a", entry(1)).unwrap();
    assert!(storage.read("a").is_none());
    assert_eq!(storage.clear(), 0);
  }
}
