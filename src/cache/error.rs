//! Error types for the cache.

use std::path::PathBuf;

/// Errors surfaced to callers of the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// The key cannot name exactly one entry file under the cache root.
  #[error("invalid cache key {key:?}: {reason}")]
  InvalidKey { key: String, reason: &'static str },

  /// The fetcher failed. The report is passed through untouched.
  #[error("{0}")]
  Fetch(color_eyre::Report),
}

/// Disk-level failures. These are logged and absorbed by the cache layer,
/// never returned from `get_or_fetch` or `invalidate`.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
  #[error("cache I/O failed for {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("corrupt cache file {}: {source}", path.display())]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to encode cache entry for {key}: {source}")]
  Encode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

impl PersistenceError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }
}

/// Reject keys that would not map to exactly one file under the root.
pub fn validate_key(key: &str) -> Result<(), CacheError> {
  let reason = if key.is_empty() {
    "key is empty"
  } else if key == "." || key == ".." {
    "key is a relative path component"
  } else if key.contains(['/', '\\']) {
    "key contains a path separator"
  } else if key.contains('\0') {
    "key contains a NUL byte"
  } else {
    return Ok(());
  };

  Err(CacheError::InvalidKey {
    key: key.to_string(),
    reason,
  })
}
