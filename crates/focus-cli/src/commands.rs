// Command execution

use std::time::Duration;

use anyhow::{Context, Result};
use focus_cache::{CacheConfig, ConfigLoader, ContainerStore, FileStore, ObjectCache};
use serde_json::{json, Value};
use tracing::debug;

use crate::router::{Cli, Commands};

/// JSON printed on stdout plus whether the command succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub json: Value,
    pub success: bool,
}

impl CommandOutput {
    fn new(json: Value, success: bool) -> Self {
        Self { json, success }
    }

    fn found(value: Option<Value>) -> Self {
        let success = value.is_some();
        Self::new(value.unwrap_or(Value::Null), success)
    }
}

/// Resolve the configuration the command line asks for
pub fn resolve_config(cli: &Cli) -> Result<CacheConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load().context("Failed to load cache configuration")?;

    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(tenant) = cli.tenant {
        config.multisite = true;
        config.initial_tenant = tenant;
    }
    config
        .validate()
        .context("Invalid cache configuration")?;
    Ok(config)
}

/// Run one command against the cache described by `config`
pub fn execute(cli: &Cli, config: CacheConfig) -> Result<CommandOutput> {
    let cache_dir = config.cache_dir.clone();
    let cache = ObjectCache::new(config).context("Failed to open cache")?;
    cache.add_global_groups(&cli.global_groups);
    let group = cli.group.as_str();

    debug!("Running {:?} in group '{}'", cli.command, group);

    let output = match &cli.command {
        Commands::Flush => {
            let flushed = cache.flush();
            CommandOutput::new(json!({ "flushed": flushed }), flushed)
        }
        Commands::Stats => CommandOutput::new(stats_report(&cache, &FileStore::new(&cache_dir))?, true),
        Commands::Get { key, force } => CommandOutput::found(cache.get_value(key, group, *force)),
        Commands::Set { key, value, ttl } => {
            let value = parse_value(value);
            let stored = match ttl {
                Some(secs) => cache.set_with_ttl(key, &value, group, Duration::from_secs(*secs)),
                None => cache.set(key, &value, group),
            };
            CommandOutput::new(json!({ "stored": stored }), stored)
        }
        Commands::Delete { key } => {
            let deleted = cache.delete(key, group);
            CommandOutput::new(json!({ "deleted": deleted }), deleted)
        }
        Commands::DeleteGroup { group } => {
            let deleted = cache.delete_group(group);
            CommandOutput::new(json!({ "deleted": deleted }), deleted)
        }
        Commands::Incr { key, by } => {
            CommandOutput::found(cache.incr(key, *by, group).map(Value::from))
        }
        Commands::Decr { key, by } => {
            CommandOutput::found(cache.decr(key, *by, group).map(Value::from))
        }
    };

    Ok(output)
}

/// Values that are not valid JSON are taken as plain strings
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn stats_report(cache: &ObjectCache, store: &FileStore) -> Result<Value> {
    let stats = cache.stats();
    let containers = store
        .containers()
        .with_context(|| format!("Failed to list containers in {}", store.root().display()))?
        .into_iter()
        .map(|(scope, group)| {
            let container = store.load(scope, &group);
            json!({
                "scope": scope.to_string(),
                "group": group,
                "entries": container.len(),
                "size_bytes": container.size_bytes(),
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({
        "root": store.root().display().to_string(),
        "tenant": cache.current_tenant(),
        "hits": stats.hits,
        "misses": stats.misses,
        "hit_rate": stats.hit_rate(),
        "containers": containers,
    }))
}
