//! Cache configuration
//!
//! Values come from an optional TOML file and then from `FOCUS_*`
//! environment variables, e.g. `FOCUS_CACHE_DIR`, `FOCUS_KEY_SALT`,
//! `FOCUS_MAX_TTL`, `FOCUS_MULTISITE`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, Result};

/// Default environment prefix
pub const ENV_PREFIX: &str = "FOCUS";

/// When mutations of persistent groups reach disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Save the container before the mutating call returns
    #[default]
    Immediate,
    /// Mark the container dirty and save on `close()` or drop
    Deferred,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory holding one sub-directory per scope
    pub cache_dir: PathBuf,
    /// Deployment-wide key prefix
    pub key_salt: Option<String>,
    /// Maximum entry age in seconds
    pub max_ttl: Option<u64>,
    /// Whether tenant switching is honoured
    pub multisite: bool,
    /// Tenant active when the cache is created
    pub initial_tenant: u64,
    pub write_mode: WriteMode,
    /// Take advisory locks around container reads and writes
    pub file_locking: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
            key_salt: None,
            max_ttl: None,
            multisite: false,
            initial_tenant: 1,
            write_mode: WriteMode::Immediate,
            file_locking: false,
        }
    }
}

impl CacheConfig {
    /// Configuration rooted at `cache_dir` with every other value defaulted
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("focus-cache"))
            .unwrap_or_else(|| PathBuf::from(".focus-cache"))
    }

    pub fn max_ttl_duration(&self) -> Option<std::time::Duration> {
        self.max_ttl.map(std::time::Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::validation("cache_dir", "must not be empty"));
        }
        if self.max_ttl == Some(0) {
            return Err(CacheError::validation(
                "max_ttl",
                "must be greater than 0 (omit it to disable expiry)",
            ));
        }
        if self.initial_tenant == 0 {
            return Err(CacheError::validation(
                "initial_tenant",
                "tenant ids start at 1",
            ));
        }
        Ok(())
    }
}

/// Loads [`CacheConfig`] from a file and the environment
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Read this TOML file before the environment. A missing file is ignored.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<CacheConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.config_path {
            builder = builder.add_source(
                File::from(path.clone())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config: CacheConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            "Loaded cache configuration: root={}, multisite={}, max_ttl={:?}",
            config.cache_dir.display(),
            config.multisite,
            config.max_ttl
        );
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
