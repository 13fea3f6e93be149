//! Cache layer that orchestrates the memory and disk levels with fetching.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::error::{validate_key, CacheError};
use super::storage::CacheStorage;
use super::traits::{CacheEntry, CacheResult, Clock, Provenance, SystemClock};

/// Freshness window used when none is configured.
pub const DEFAULT_TTL_SECS: i64 = 3600;

type KeyLocks = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Two-level TTL cache in front of a fetcher.
///
/// Lookups go memory, then disk (promoting fresh disk entries into memory),
/// then the fetcher, whose result is written to memory and then, best-effort,
/// to disk. Fetches for the same key are serialized: while one caller is
/// fetching, others wait and then reuse its result.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  memory: Arc<Mutex<HashMap<String, CacheEntry>>>,
  fetch_locks: Arc<Mutex<KeyLocks>>,
  /// How long a fetched value stays fresh
  ttl: Duration,
  clock: Arc<dyn Clock>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      memory: Arc::new(Mutex::new(HashMap::new())),
      fetch_locks: Arc::new(Mutex::new(HashMap::new())),
      ttl: Duration::seconds(DEFAULT_TTL_SECS),
      clock: Arc::new(SystemClock),
    }
  }

  /// Set the freshness window.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Replace the time source.
  #[allow(dead_code)]
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    // Entries are replaced whole, so a poisoned map is still consistent
    self.memory.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn fetch_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = self
      .fetch_locks
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(key.to_string()).or_default())
  }

  /// Fresh memory entry for a key. A stale one is dropped on the way.
  fn memory_get(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
    let mut memory = self.memory();
    let fresh = memory.get(key)?.is_fresh(now, self.ttl);
    if fresh {
      return memory.get(key).cloned();
    }
    debug!(key, "memory entry expired");
    memory.remove(key);
    None
  }

  /// Fresh disk entry for a key. Unreadable files count as a miss.
  fn disk_get(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
    match self.storage.read(key) {
      Ok(Some(entry)) if entry.is_fresh(now, self.ttl) => Some(entry),
      Ok(Some(_)) => {
        debug!(key, "disk entry expired");
        None
      }
      Ok(None) => None,
      Err(e) => {
        warn!(key, error = %e, "ignoring unreadable cache file");
        None
      }
    }
  }

  fn drop_key(&self, key: &str) {
    self.memory().remove(key);
    if let Err(e) = self.storage.remove(key) {
      warn!(key, error = %e, "failed to delete cache file");
    }
  }

  /// Return the value for `key`, fetching it when no fresh copy is cached.
  ///
  /// With `force_refresh` the key is invalidated first and the fetcher
  /// always runs. A fetch failure is returned as [`CacheError::Fetch`] and
  /// leaves both levels as they were; stale data is never served instead.
  /// Failing to persist the fetched value is not an error: the result is
  /// tagged [`Provenance::ApiUnpersisted`] and memory keeps serving it.
  pub async fn get_or_fetch<F, Fut>(
    &self,
    key: &str,
    force_refresh: bool,
    fetcher: F,
  ) -> Result<CacheResult<Value>, CacheError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = color_eyre::Result<Value>>,
  {
    validate_key(key)?;

    if !force_refresh {
      if let Some(entry) = self.memory_get(key, self.clock.now()) {
        debug!(key, "memory hit");
        return Ok(CacheResult::from_entry(entry, Provenance::Memory));
      }
    }

    let lock = self.fetch_lock(key);
    let _flight = lock.lock().await;

    if force_refresh {
      info!(key, "forced refresh");
      self.drop_key(key);
    } else {
      let now = self.clock.now();

      // Another caller may have fetched while we waited for the lock
      if let Some(entry) = self.memory_get(key, now) {
        debug!(key, "memory hit after waiting for fetch");
        return Ok(CacheResult::from_entry(entry, Provenance::Memory));
      }

      if let Some(entry) = self.disk_get(key, now) {
        debug!(key, "disk hit, promoting to memory");
        self.memory().insert(key.to_string(), entry.clone());
        return Ok(CacheResult::from_entry(entry, Provenance::Disk));
      }
    }

    debug!(key, "cache miss, fetching");
    let value = fetcher().await.map_err(CacheError::Fetch)?;
    let entry = CacheEntry::new(value, self.clock.now());

    self.memory().insert(key.to_string(), entry.clone());

    let source = match self.storage.write(key, &entry) {
      Ok(()) => Provenance::Api,
      Err(e) => {
        warn!(key, error = %e, "failed to persist cache entry, keeping it in memory only");
        Provenance::ApiUnpersisted
      }
    };

    Ok(CacheResult::from_entry(entry, source))
  }

  /// Drop one key from both levels, or everything when `key` is `None` or empty.
  ///
  /// Missing entries are not an error. Disk failures are logged and ignored.
  /// This does not wait for a fetch already in flight for the key; that
  /// fetch still stores its value when it completes.
  pub fn invalidate(&self, key: Option<&str>) -> Result<(), CacheError> {
    match key.filter(|k| !k.is_empty()) {
      Some(key) => {
        validate_key(key)?;
        self.drop_key(key);
        info!(key, "invalidated cache entry");
      }
      None => {
        self.memory().clear();
        match self.storage.clear() {
          Ok(removed) => info!(removed, "invalidated all cache entries"),
          Err(e) => warn!(error = %e, "failed to delete some cache files"),
        }
      }
    }
    Ok(())
  }

  /// Snapshot of what both levels currently hold.
  pub fn status(&self) -> CacheStatus {
    let now = self.clock.now();

    let mut memory: Vec<String> = self.memory().keys().cloned().collect();
    memory.sort();

    let stored = self.storage.list().unwrap_or_else(|e| {
      warn!(error = %e, "failed to list cache directory");
      Vec::new()
    });

    let disk = stored
      .into_iter()
      .map(|stored| match stored.fetched_at {
        Some(fetched_at) => DiskStatus {
          key: stored.key,
          fetched_at: Some(fetched_at),
          age_secs: Some((now - fetched_at).num_seconds()),
          fresh: now - fetched_at < self.ttl,
        },
        None => DiskStatus {
          key: stored.key,
          fetched_at: None,
          age_secs: None,
          fresh: false,
        },
      })
      .collect();

    CacheStatus {
      ttl_secs: self.ttl.num_seconds(),
      memory,
      disk,
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      memory: Arc::clone(&self.memory),
      fetch_locks: Arc::clone(&self.fetch_locks),
      ttl: self.ttl,
      clock: Arc::clone(&self.clock),
    }
  }
}

/// Contents of both cache levels.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
  pub ttl_secs: i64,
  /// Keys resident in memory (possibly stale until next looked up)
  pub memory: Vec<String>,
  pub disk: Vec<DiskStatus>,
}

/// One persisted entry. `fetched_at` is `None` for unreadable files.
#[derive(Debug, Clone, Serialize)]
pub struct DiskStatus {
  pub key: String,
  pub fetched_at: Option<DateTime<Utc>>,
  pub age_secs: Option<i64>,
  pub fresh: bool,
}
