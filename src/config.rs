//! Service configuration.
//!
//! Read from `cqn.toml` in the working directory or from
//! `<config dir>/cqn/config.toml`:
//!
//! ```toml
//! [database]
//! url = "sqlite::memory:"
//! dialect = "sqlite"
//! model = "srv/csn.json"
//!
//! [pool]
//! max_connections = 4
//! acquire_timeout_ms = 5000
//!
//! [emulation]
//! force = ["limit", "orderBy"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::PoolConfig;
use crate::emulation::{EmulationConfig, Stage};
use crate::error::{CqnError, CqnResult};
use crate::transpiler::Dialect;

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "cqn.toml";

/// Main service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub emulation: EmulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default = "default_url")]
    pub url: String,

    /// SQL dialect; derived from the URL when absent
    pub dialect: Option<Dialect>,

    /// Path to the CSN model (optional)
    pub model: Option<PathBuf>,
}

fn default_url() -> String {
    "sqlite::memory:".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            dialect: None,
            model: None,
        }
    }
}

/// `[pool]` section; durations in plain numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub max_connections: usize,
    pub min_connections: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolSection {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout_ms: config.acquire_timeout.as_millis() as u64,
            idle_timeout_secs: config.idle_timeout.as_secs(),
            max_lifetime_secs: config.max_lifetime.map(|d| d.as_secs()),
        }
    }
}

impl PoolSection {
    pub fn to_pool_config(&self) -> PoolConfig {
        let config = PoolConfig::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs));
        match self.max_lifetime_secs {
            Some(secs) => config.max_lifetime(Duration::from_secs(secs)),
            None => config,
        }
    }
}

impl Config {
    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn from_toml(text: &str) -> CqnResult<Self> {
        let config: Config = toml::from_str(text).map_err(|e| CqnError::Config(e.to_string()))?;
        if config.pool.max_connections == 0 {
            return Err(CqnError::Config("pool.max_connections must be at least 1".into()));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> CqnResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// First configuration file found: `./cqn.toml`, then the user's config
    /// directory.
    pub fn discover() -> CqnResult<Option<(PathBuf, Self)>> {
        let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("cqn").join("config.toml"));
        }
        for path in candidates {
            if path.is_file() {
                let config = Self::load(&path)?;
                return Ok(Some((path, config)));
            }
        }
        Ok(None)
    }

    /// Configured dialect, or the one the URL implies.
    pub fn dialect(&self) -> CqnResult<Dialect> {
        match self.database.dialect {
            Some(dialect) => Ok(dialect),
            None => Dialect::from_url(&self.database.url).ok_or_else(|| {
                CqnError::Config(format!("cannot tell the dialect of '{}'", self.database.url))
            }),
        }
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from a loaded configuration
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = url.into();
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.config.database.dialect = Some(dialect);
        self
    }

    /// Set the model path
    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database.model = Some(path.into());
        self
    }

    pub fn pool(mut self, pool: &PoolConfig) -> Self {
        self.config.pool = PoolSection::from(pool);
        self
    }

    /// Emulate `stage` regardless of dialect support
    pub fn force(mut self, stage: Stage) -> Self {
        self.config.emulation.force.insert(stage);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = Config::from_toml(
            r#"
            [database]
            url = "postgres://localhost/bookshop"
            model = "srv/csn.json"

            [pool]
            max_connections = 4
            acquire_timeout_ms = 250
            max_lifetime_secs = 60

            [emulation]
            force = ["limit", "orderBy"]
            "#,
        )
        .unwrap();

        assert_eq!(config.dialect().unwrap(), Dialect::Postgres);
        assert_eq!(config.database.model, Some(PathBuf::from("srv/csn.json")));
        let pool = config.pool.to_pool_config();
        assert_eq!(pool.max_connections, 4);
        assert_eq!(pool.min_connections, 1);
        assert_eq!(pool.acquire_timeout, Duration::from_millis(250));
        assert_eq!(pool.max_lifetime, Some(Duration::from_secs(60)));
        assert!(config.emulation.is_forced(Stage::Limit));
        assert!(config.emulation.is_forced(Stage::OrderBy));
        assert!(!config.emulation.is_forced(Stage::Where));
    }

    #[test]
    fn test_defaults_and_errors() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.dialect().unwrap(), Dialect::SQLite);

        assert!(matches!(
            Config::from_toml("[emulation]\nforce = [\"sort\"]"),
            Err(CqnError::Config(_))
        ));
        assert!(matches!(
            Config::from_toml("[pool]\nmax_connections = 0"),
            Err(CqnError::Config(_))
        ));
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder()
            .database("sqlite://bookshop.db")
            .dialect(Dialect::Hana)
            .pool(&PoolConfig::new().max_connections(2))
            .force(Stage::Where)
            .build();
        assert_eq!(config.dialect().unwrap(), Dialect::Hana);
        assert_eq!(config.pool.max_connections, 2);
        assert!(config.emulation.is_forced(Stage::Where));
    }
}
