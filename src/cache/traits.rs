//! Core types for the two-level cache.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source of the current time.
///
/// Freshness is always judged against this clock, so tests can move time
/// forward without sleeping.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A cached payload together with the time it was fetched from the API.
///
/// This is also the on-disk record: `{"ts": <epoch seconds>, "data": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  #[serde(rename = "ts", with = "epoch_seconds")]
  pub fetched_at: DateTime<Utc>,
  #[serde(rename = "data")]
  pub value: Value,
}

impl CacheEntry {
  pub fn new(value: Value, fetched_at: DateTime<Utc>) -> Self {
    Self { fetched_at, value }
  }

  /// `now - fetched_at < ttl`.
  pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    now - self.fetched_at < ttl
  }
}

/// Where a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  /// Fresh entry already resident in memory
  Memory,
  /// Fresh entry read from disk and promoted to memory
  Disk,
  /// Fetched from the API and written to both levels
  Api,
  /// Fetched from the API; the disk write failed so only memory holds it
  ApiUnpersisted,
}

impl Provenance {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Memory => "memory",
      Self::Disk => "disk",
      Self::Api => "api",
      Self::ApiUnpersisted => "api_unpersisted",
    }
  }
}

impl std::fmt::Display for Provenance {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Result of a cache lookup, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Which level satisfied the lookup
  pub source: Provenance,
  /// When the data was fetched from the API
  pub fetched_at: DateTime<Utc>,
}

impl CacheResult<Value> {
  pub(crate) fn from_entry(entry: CacheEntry, source: Provenance) -> Self {
    Self {
      data: entry.value,
      source,
      fetched_at: entry.fetched_at,
    }
  }
}

/// Timestamps are stored as fractional seconds since the Unix epoch.
mod epoch_seconds {
  use chrono::{DateTime, Utc};
  use serde::{de::Error, Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    let secs = ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_micros()) / 1_000_000.0;
    serializer.serialize_f64(secs)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() {
      return Err(D::Error::custom("timestamp is not a finite number"));
    }
    let whole = secs.floor();
    let micros = ((secs - whole) * 1_000_000.0).round() as i64;
    DateTime::from_timestamp(whole as i64, 0)
      .map(|ts| ts + chrono::Duration::microseconds(micros))
      .ok_or_else(|| D::Error::custom(format!("timestamp {secs} out of range")))
  }
}
