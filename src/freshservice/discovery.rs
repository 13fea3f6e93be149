//! Form-field discovery with caching.
//!
//! Each [`EntityType`] owns one cache key and one remote fetch. The set is
//! closed, so an unknown entity name is rejected when parsed and never
//! reaches the cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use crate::cache::{CacheError, CacheLayer, CacheStorage, Provenance};

/// Entities whose field templates can be discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
  Ticket,
  Change,
  Agent,
  Requester,
  AssetType,
}

impl EntityType {
  pub const ALL: [EntityType; 5] = [
    EntityType::Ticket,
    EntityType::Change,
    EntityType::Agent,
    EntityType::Requester,
    EntityType::AssetType,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      EntityType::Ticket => "ticket",
      EntityType::Change => "change",
      EntityType::Agent => "agent",
      EntityType::Requester => "requester",
      EntityType::AssetType => "asset_type",
    }
  }

  /// Key under which this entity's fields are cached
  pub fn cache_key(self) -> &'static str {
    match self {
      EntityType::Ticket => "fields_ticket",
      EntityType::Change => "fields_change",
      EntityType::Agent => "fields_agent",
      EntityType::Requester => "fields_requester",
      EntityType::AssetType => "asset_types",
    }
  }

  /// API path relative to `/api/v2/`
  pub fn endpoint(self) -> &'static str {
    match self {
      EntityType::Ticket => "ticket_form_fields",
      EntityType::Change => "change_form_fields",
      EntityType::Agent => "agent_fields",
      EntityType::Requester => "requester_fields",
      EntityType::AssetType => "asset_types",
    }
  }
}

impl std::fmt::Display for EntityType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    EntityType::ALL
      .into_iter()
      .find(|e| e.as_str() == s)
      .ok_or_else(|| {
        let valid: Vec<_> = EntityType::ALL.iter().map(|e| e.as_str()).collect();
        format!(
          "Unknown entity type '{}'. Valid types: {}",
          s,
          valid.join(", ")
        )
      })
  }
}

/// Where field definitions come from when the cache has nothing fresh.
pub trait FieldSource: Send + Sync {
  fn fetch(&self, entity: EntityType) -> impl Future<Output = Result<Value>> + Send;
}

/// Field definitions for one entity type.
#[derive(Debug, Clone, Serialize)]
pub struct Discovered {
  pub entity_type: EntityType,
  pub source: Provenance,
  pub fetched_at: DateTime<Utc>,
  pub data: Value,
}

/// Confirmation returned by [`clear_field_cache`].
#[derive(Debug, Clone, Serialize)]
pub struct Cleared {
  pub success: bool,
  pub message: String,
}

/// Cached access to field definitions.
pub struct Discovery<C: FieldSource, S: CacheStorage> {
  source: Arc<C>,
  cache: CacheLayer<S>,
}

impl<C: FieldSource, S: CacheStorage> Discovery<C, S> {
  pub fn new(source: Arc<C>, cache: CacheLayer<S>) -> Self {
    Self { source, cache }
  }

  /// Field definitions for `entity`, from cache when fresh.
  pub async fn discover_form_fields(
    &self,
    entity: EntityType,
    force_refresh: bool,
  ) -> Result<Discovered, CacheError> {
    let result = self
      .cache
      .get_or_fetch(entity.cache_key(), force_refresh, || {
        self.source.fetch(entity)
      })
      .await?;

    Ok(Discovered {
      entity_type: entity,
      source: result.source,
      fetched_at: result.fetched_at,
      data: result.data,
    })
  }

  /// Discover every entity type concurrently.
  pub async fn discover_all(
    &self,
    force_refresh: bool,
  ) -> Vec<(EntityType, Result<Discovered, CacheError>)> {
    let lookups = EntityType::ALL.into_iter().map(|entity| async move {
      (entity, self.discover_form_fields(entity, force_refresh).await)
    });
    futures::future::join_all(lookups).await
  }
}

/// Clearing needs only the cache, not API credentials.
pub fn clear_field_cache<S: CacheStorage>(
  cache: &CacheLayer<S>,
  entity: Option<EntityType>,
) -> Result<Cleared, CacheError> {
  match entity {
    Some(entity) => {
      cache.invalidate(Some(entity.cache_key()))?;
      Ok(Cleared {
        success: true,
        message: format!("Cache cleared for '{}'", entity),
      })
    }
    None => {
      cache.invalidate(None)?;
      Ok(Cleared {
        success: true,
        message: "All field caches cleared".to_string(),
      })
    }
  }
}
