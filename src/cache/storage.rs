//! Disk level of the cache: trait and file-per-key implementation.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::PersistenceError;
use super::traits::CacheEntry;

const ENTRY_EXT: &str = ".json";
const STAGING_EXT: &str = ".tmp";

/// A persisted entry as seen by a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
  pub key: String,
  /// `None` when the file could not be read or parsed
  pub fetched_at: Option<DateTime<Utc>>,
}

/// Trait for the persistent cache level.
///
/// Implementations report every failure; deciding that a failure is
/// non-fatal is the cache layer's job.
pub trait CacheStorage: Send + Sync {
  /// Read the entry for a key. `Ok(None)` when nothing is stored.
  fn read(&self, key: &str) -> Result<Option<CacheEntry>, PersistenceError>;

  /// Store an entry, replacing any previous one atomically.
  fn write(&self, key: &str, entry: &CacheEntry) -> Result<(), PersistenceError>;

  /// Delete the entry for a key. Deleting a missing entry succeeds.
  fn remove(&self, key: &str) -> Result<(), PersistenceError>;

  /// Delete every entry. Returns how many files were removed.
  fn clear(&self) -> Result<usize, PersistenceError>;

  /// List persisted entries, fresh or not.
  fn list(&self) -> Result<Vec<StoredEntry>, PersistenceError>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - the cache runs memory-only.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn read(&self, _key: &str) -> Result<Option<CacheEntry>, PersistenceError> {
    Ok(None) // Always miss
  }

  fn write(&self, _key: &str, _entry: &CacheEntry) -> Result<(), PersistenceError> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<(), PersistenceError> {
    Ok(())
  }

  fn clear(&self) -> Result<usize, PersistenceError> {
    Ok(0)
  }

  fn list(&self) -> Result<Vec<StoredEntry>, PersistenceError> {
    Ok(Vec::new())
  }
}

/// One JSON file per key under a root directory.
///
/// `<root>/<key>.json` holds `{"ts": .., "data": ..}`. Writes go to a
/// staging file in the same directory and are renamed into place, so a
/// reader sees either the old file or the new one.
#[derive(Debug, Clone)]
pub struct FileStorage {
  root: PathBuf,
}

/// Distinguishes staging files written concurrently by this process.
static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

impl FileStorage {
  /// The directory is created lazily on the first write.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Path of the entry file for a key.
  pub fn entry_path(&self, key: &str) -> PathBuf {
    self.root.join(format!("{key}{ENTRY_EXT}"))
  }

  fn staging_path(&self, key: &str) -> PathBuf {
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    self.root.join(format!(
      ".{key}{ENTRY_EXT}.{}.{seq}{STAGING_EXT}",
      std::process::id()
    ))
  }

  fn is_entry_file(name: &str) -> bool {
    name.ends_with(ENTRY_EXT) && name.len() > ENTRY_EXT.len()
  }

  fn is_staging_file(name: &str) -> bool {
    name.starts_with('.') && name.contains(ENTRY_EXT) && name.ends_with(STAGING_EXT)
  }

  /// File names directly under the root. A missing root is empty.
  fn file_names(&self) -> Result<Vec<String>, PersistenceError> {
    let dir = match fs::read_dir(&self.root) {
      Ok(dir) => dir,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(PersistenceError::io(&self.root, e)),
    };

    let mut names = Vec::new();
    for item in dir {
      let item = item.map_err(|e| PersistenceError::io(&self.root, e))?;
      let is_file = item.file_type().map(|t| t.is_file()).unwrap_or(false);
      if !is_file {
        continue;
      }
      if let Some(name) = item.file_name().to_str() {
        names.push(name.to_string());
      }
    }
    names.sort();
    Ok(names)
  }
}

impl CacheStorage for FileStorage {
  fn read(&self, key: &str) -> Result<Option<CacheEntry>, PersistenceError> {
    let path = self.entry_path(key);
    let content = match fs::read(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(PersistenceError::io(path, e)),
    };

    serde_json::from_slice(&content)
      .map(Some)
      .map_err(|source| PersistenceError::Corrupt { path, source })
  }

  fn write(&self, key: &str, entry: &CacheEntry) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec(entry).map_err(|source| PersistenceError::Encode {
      key: key.to_string(),
      source,
    })?;

    fs::create_dir_all(&self.root).map_err(|e| PersistenceError::io(&self.root, e))?;

    let staging = self.staging_path(key);
    fs::write(&staging, json).map_err(|e| PersistenceError::io(&staging, e))?;

    let path = self.entry_path(key);
    if let Err(e) = fs::rename(&staging, &path) {
      let _ = fs::remove_file(&staging);
      return Err(PersistenceError::io(path, e));
    }
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), PersistenceError> {
    let path = self.entry_path(key);
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(PersistenceError::io(path, e)),
    }
  }

  fn clear(&self) -> Result<usize, PersistenceError> {
    let mut removed = 0;
    let mut first_error = None;

    for name in self.file_names()? {
      if !Self::is_entry_file(&name) && !Self::is_staging_file(&name) {
        continue;
      }
      let path = self.root.join(&name);
      match fs::remove_file(&path) {
        Ok(()) => removed += 1,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
          // Keep going so one bad file doesn't pin the rest
          first_error.get_or_insert(PersistenceError::io(path, e));
        }
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(removed),
    }
  }

  fn list(&self) -> Result<Vec<StoredEntry>, PersistenceError> {
    let entries = self
      .file_names()?
      .into_iter()
      .filter(|name| Self::is_entry_file(name) && !Self::is_staging_file(name))
      .map(|name| {
        let key = name[..name.len() - ENTRY_EXT.len()].to_string();
        let fetched_at = self.read(&key).ok().flatten().map(|e| e.fetched_at);
        StoredEntry { key, fetched_at }
      })
      .collect();

    Ok(entries)
  }
}
