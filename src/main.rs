mod cache;
mod config;
mod freshservice;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use cache::{CacheError, CacheLayer, CacheStorage, FileStorage, NoopStorage};
use freshservice::discovery::clear_field_cache;
use freshservice::{Discovery, EntityType, FreshserviceClient};

#[derive(Parser, Debug)]
#[command(name = "fsmeta")]
#[command(about = "Discover Freshservice form fields, cached locally")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fsmeta/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache directory (overrides CACHE_DIR)
  #[arg(long, global = true)]
  cache_dir: Option<PathBuf>,

  /// Seconds a cached entry stays fresh (overrides CACHE_TTL)
  #[arg(long, global = true)]
  ttl: Option<u64>,

  /// Keep the cache in memory only
  #[arg(long, global = true)]
  no_persist: bool,

  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show the form fields configured for an entity type
  Discover {
    /// ticket, change, agent, requester or asset_type
    entity: EntityType,
    /// Bypass the cache and re-fetch from Freshservice
    #[arg(long)]
    force_refresh: bool,
  },
  /// Discover the fields of every entity type
  DiscoverAll {
    #[arg(long)]
    force_refresh: bool,
  },
  /// Clear cached fields for one entity type, or all of them
  Clear {
    /// Entity type to clear; all of them when omitted
    entity: Option<EntityType>,
  },
  /// Show what the cache currently holds
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line wins over file and environment
  if let Some(dir) = args.cache_dir {
    config.cache.dir = Some(dir);
  }
  if let Some(ttl) = args.ttl {
    config.cache.ttl_secs = ttl;
  }
  if args.no_persist {
    config.cache.persist = false;
  }

  let _log_guard = logging::init(config.log_file.as_deref(), args.verbose)?;

  if config.cache.persist {
    let root = config.cache_dir()?;
    debug!(root = %root.display(), ttl_secs = config.cache.ttl_secs, "using disk cache");
    let cache = CacheLayer::new(FileStorage::new(root)).with_ttl(config.ttl());
    run(args.command, &config, cache).await
  } else {
    let cache = CacheLayer::new(NoopStorage).with_ttl(config.ttl());
    run(args.command, &config, cache).await
  }
}

async fn run<S: CacheStorage>(
  command: Command,
  config: &config::Config,
  cache: CacheLayer<S>,
) -> Result<()> {
  match command {
    Command::Discover {
      entity,
      force_refresh,
    } => {
      let discovery = Discovery::new(Arc::new(FreshserviceClient::new(config)?), cache);
      let discovered = discovery
        .discover_form_fields(entity, force_refresh)
        .await
        .map_err(into_report)?;
      print_json(&discovered)
    }
    Command::DiscoverAll { force_refresh } => {
      let discovery = Discovery::new(Arc::new(FreshserviceClient::new(config)?), cache);
      let mut output = Map::new();
      let mut failed = 0;

      for (entity, result) in discovery.discover_all(force_refresh).await {
        let value = match result {
          Ok(discovered) => serde_json::to_value(discovered)?,
          Err(e) => {
            failed += 1;
            json!({ "error": into_report(e).to_string() })
          }
        };
        output.insert(entity.to_string(), value);
      }

      print_json(&Value::Object(output))?;
      if failed > 0 {
        return Err(eyre!("{} of {} entity types failed", failed, EntityType::ALL.len()));
      }
      Ok(())
    }
    Command::Clear { entity } => {
      let cleared = clear_field_cache(&cache, entity).map_err(into_report)?;
      print_json(&cleared)
    }
    Command::Status => print_json(&cache.status()),
  }
}

/// Fetch failures keep the fetcher's own report.
fn into_report(err: CacheError) -> color_eyre::Report {
  match err {
    CacheError::Fetch(report) => report,
    other => other.into(),
  }
}

fn print_json(value: &impl Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
