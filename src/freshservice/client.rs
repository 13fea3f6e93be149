use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::future::Future;
use tracing::debug;
use url::Url;

use crate::config::Config;

use super::discovery::{EntityType, FieldSource};

/// Page size for paginated list endpoints
const PER_PAGE: u32 = 100;

/// Freshservice API v2 client (authenticated GET only)
#[derive(Clone)]
pub struct FreshserviceClient {
  http: reqwest::Client,
  base: Url,
  api_key: String,
}

impl FreshserviceClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    Self::with_credentials(config.domain()?, api_key)
  }

  /// `domain` is a bare host ("acme.freshservice.com") or a full base URL.
  pub fn with_credentials(domain: &str, api_key: String) -> Result<Self> {
    let base = base_url(domain)?;
    let http = reqwest::Client::builder()
      .user_agent(concat!("fsmeta/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      api_key,
    })
  }

  fn url(&self, path: &str) -> Result<Url> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  /// GET a path under `/api/v2/` and parse the JSON body.
  ///
  /// Non-2xx responses are errors carrying the status and response body.
  pub async fn get(&self, path: &str, query: &[(&str, u32)]) -> Result<Value> {
    let url = self.url(path)?;
    debug!(%url, "GET");

    let response = self
      .http
      .get(url)
      .basic_auth(&self.api_key, Some("X"))
      .query(query)
      .send()
      .await
      .map_err(|e| eyre!("GET {} failed: {}", path, e))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!("GET {} returned {}: {}", path, status, body));
    }

    response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", path, e))
  }

  /// Get all asset types across pages
  pub async fn get_asset_types(&self) -> Result<Value> {
    let endpoint = EntityType::AssetType.endpoint();
    let all_types = collect_pages("asset_types", |page| async move {
      self
        .get(endpoint, &[("page", page), ("per_page", PER_PAGE)])
        .await
    })
    .await?;

    Ok(Value::Array(all_types))
  }
}

impl FieldSource for FreshserviceClient {
  async fn fetch(&self, entity: EntityType) -> Result<Value> {
    match entity {
      EntityType::AssetType => self.get_asset_types().await,
      other => self.get(other.endpoint(), &[]).await,
    }
  }
}

fn base_url(domain: &str) -> Result<Url> {
  let domain = domain.trim().trim_end_matches('/');
  if domain.is_empty() {
    return Err(eyre!("Freshservice domain is empty"));
  }

  let raw = if domain.starts_with("http://") || domain.starts_with("https://") {
    format!("{}/", domain)
  } else {
    format!("https://{}/api/v2/", domain)
  };

  Url::parse(&raw).map_err(|e| eyre!("Invalid Freshservice domain {}: {}", domain, e))
}

/// Fetch numbered pages starting at 1 and concatenate the `field` array of
/// each, stopping at the first page where it is empty or missing.
pub async fn collect_pages<F, Fut>(field: &str, mut fetch_page: F) -> Result<Vec<Value>>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<Value>>,
{
  let mut all_items = Vec::new();
  let mut page = 1u32;

  loop {
    let mut body = fetch_page(page).await?;
    let items = match body.get_mut(field).map(Value::take) {
      Some(Value::Array(items)) if !items.is_empty() => items,
      _ => break,
    };

    all_items.extend(items);
    page += 1;
  }

  Ok(all_items)
}
