//! Context configuration.
//!
//! Settings are layered with `figment`, later sources overriding earlier ones:
//!
//! 1. Built-in defaults ([`HashConfig::default`])
//! 2. A TOML file: the one passed explicitly, else `config.toml` in the
//!    platform config directory if it exists
//! 3. `PIHASH_*` environment variables (e.g. `PIHASH_CACHE_DIR`, `PIHASH_PRECISION`)
//! 4. Explicit overrides applied by the caller after loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheOptions, KeyStrategy};
use crate::error::InitError;
use crate::hashing::Precision;

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".hash_cache";

/// Default database file name inside the cache directory.
pub const DEFAULT_CACHE_FILE: &str = "hashes.db";

/// Prefix of environment variables read by [`HashConfig::load`].
pub const ENV_PREFIX: &str = "PIHASH_";

/// Configuration of a [`HashContext`](crate::HashContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Directory holding the cache database. Created on demand.
    pub cache_dir: PathBuf,
    /// Database file name inside `cache_dir`.
    pub cache_file: String,
    /// How image paths become cache keys.
    pub key_strategy: KeyStrategy,
    /// Hash size: `low` (4×4) or `medium` (8×8).
    pub precision: Precision,
    /// Read-only database connections used for lookups. Zero sends lookups
    /// through the writer connection.
    pub reader_connections: usize,
    /// Number of per-identity lock stripes.
    pub lock_stripes: usize,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Move an unreadable cache file aside instead of failing.
    pub recover_corrupt_cache: bool,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_file: DEFAULT_CACHE_FILE.to_string(),
            key_strategy: KeyStrategy::Path,
            precision: Precision::Medium,
            reader_connections: 4,
            lock_stripes: 16,
            busy_timeout_ms: 5000,
            recover_corrupt_cache: true,
        }
    }
}

impl HashConfig {
    /// Configuration with defaults except for the cache directory.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// The layered figment: defaults, TOML file, then `PIHASH_*` variables.
    pub fn figment(config_file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match config_file {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                if let Some(path) = Self::default_config_path().filter(|p| p.exists()) {
                    log::debug!("Using config file {}", path.display());
                    figment = figment.merge(Toml::file(path));
                }
            }
        }

        // PIHASH_LOG is a logging filter, not a setting
        figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["log"]))
    }

    /// Load and validate the layered configuration.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Config`] if a source cannot be parsed and
    /// [`InitError::InvalidConfig`] if a value is out of range.
    pub fn load(config_file: Option<&Path>) -> Result<Self, InitError> {
        if let Some(path) = config_file {
            // Toml::file silently skips missing files
            if !path.exists() {
                return Err(InitError::InvalidConfig(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }
        let config: Self = Self::figment(config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no cache can run with.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.cache_file.trim().is_empty() {
            return Err(InitError::InvalidConfig("cache_file must not be empty".into()));
        }
        if Path::new(&self.cache_file).components().count() != 1 {
            return Err(InitError::InvalidConfig(format!(
                "cache_file must be a plain file name, got '{}'",
                self.cache_file
            )));
        }
        if self.lock_stripes == 0 {
            return Err(InitError::InvalidConfig("lock_stripes must be at least 1".into()));
        }
        Ok(())
    }

    /// Full path of the cache database.
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(&self.cache_file)
    }

    /// Connection settings for the cache.
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            reader_connections: self.reader_connections,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    /// Platform cache directory for pihash (e.g. `~/.cache/pihash` on Linux).
    pub fn user_cache_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
    }

    /// Platform location of the optional `config.toml`.
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "pihash", "pihash")
}
