//! Configuration loading and database path resolution
//!
//! Resolution follows the same priority order everywhere:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error: defaults are used and a warning is
//! logged. A config file that exists but does not parse or validate is.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::resolver::OverrideRetention;
use crate::sources::{SourceRegistry, CELESTRAK};
use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "KESSLER_CONFIG";
/// Environment variable naming the database file
pub const DATABASE_ENV_VAR: &str = "KESSLER_DATABASE";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KesslerConfig {
    pub database_path: Option<PathBuf>,
    pub sources: SourcesConfig,
    pub search: SearchConfig,
    pub promotion: PromotionConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Resolution precedence, most authoritative first
    pub priority: SourceRegistry,
    /// Source expected to contribute canonical orbit/TLE data
    pub orbital_source: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            priority: SourceRegistry::default(),
            orbital_source: CELESTRAK.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Batches larger than this warrant operator confirmation
    pub confirmation_threshold: usize,
    /// Progress callback cadence, in processed records
    pub progress_interval: usize,
    /// Identifiers shown when warning about overwrites
    pub conflict_sample_size: usize,
    /// Concurrent records in flight during a batch
    pub workers: usize,
    pub override_retention: OverrideRetention,
    /// Actor tag recorded on every transformation
    pub promoted_by: String,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 10,
            progress_interval: 10,
            conflict_sample_size: 5,
            workers: 4,
            override_retention: OverrideRetention::default(),
            promoted_by: "manual_script".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Rows fetched per page by the lazy scan
    pub scan_page_size: u32,
    /// Attempts before a contended write gives up
    pub max_cas_attempts: u32,
    /// SQLite busy timeout
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            scan_page_size: 500,
            max_cas_attempts: 8,
            busy_timeout_ms: 5000,
        }
    }
}

impl KesslerConfig {
    /// Load configuration, honoring an explicit path when given
    ///
    /// An explicit path (argument or `KESSLER_CONFIG`) must exist. Default
    /// locations are optional.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let explicit = cli_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                path
            }
            None => match find_default_config_file() {
                Some(path) => path,
                None => {
                    warn!("No config file found, using compiled defaults");
                    return Ok(Self::default());
                }
            },
        };

        let config = Self::from_file(&path)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.priority.is_empty() {
            return Err(Error::Config("sources.priority must name at least one source".into()));
        }
        if self.sources.orbital_source.trim().is_empty() {
            return Err(Error::Config("sources.orbital_source must not be empty".into()));
        }
        if self.search.default_limit == 0 || self.search.max_limit == 0 {
            return Err(Error::Config("search limits must be greater than zero".into()));
        }
        if self.search.default_limit > self.search.max_limit {
            return Err(Error::Config(format!(
                "search.default_limit ({}) exceeds search.max_limit ({})",
                self.search.default_limit, self.search.max_limit
            )));
        }
        if self.promotion.progress_interval == 0 || self.promotion.workers == 0 {
            return Err(Error::Config(
                "promotion.progress_interval and promotion.workers must be greater than zero".into(),
            ));
        }
        if self.store.scan_page_size == 0 || self.store.max_cas_attempts == 0 {
            return Err(Error::Config(
                "store.scan_page_size and store.max_cas_attempts must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Database file location
    pub fn resolve_database_path(&self, cli_arg: Option<&Path>) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &self.database_path {
            return path.clone();
        }

        // Priority 4: OS-dependent compiled default
        default_database_path()
    }
}

/// First existing config file in the platform's default locations
fn find_default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("kessler").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/kessler/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kessler"))
        .unwrap_or_else(|| PathBuf::from("./kessler_data"))
        .join("kessler.db")
}
