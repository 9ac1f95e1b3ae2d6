//! Configuration schema (seedline.toml)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Target datastore configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Embedded SQLite database at the given path
    Sqlite { path: PathBuf },

    /// Process-local in-memory store (dry runs and tests)
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("seedline.db"),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned for declaration files
    #[serde(default = "default_decl_dir")]
    pub decl_dir: PathBuf,

    /// Target datastore
    #[serde(default)]
    pub store: StoreConfig,

    /// Bounded worker pool size: maximum table seeds in flight at one
    /// dependency level. Sized to the datastore's safe concurrent-connection
    /// limit.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Where the JSON run report is written
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
}

fn default_decl_dir() -> PathBuf {
    PathBuf::from("declarations")
}

fn default_max_connections() -> usize {
    4
}

fn default_report_path() -> PathBuf {
    PathBuf::from("report.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            decl_dir: default_decl_dir(),
            store: StoreConfig::default(),
            max_connections: default_max_connections(),
            report_path: default_report_path(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Load config from a TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.decl_dir, PathBuf::from("declarations"));
    }

    #[test]
    fn config_from_toml() {
        let config = Config::from_toml(
            r#"
            decl_dir = "db/declarations"
            max_connections = 2

            [store]
            type = "sqlite"
            path = "fixtures.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_connections, 2);
        assert_eq!(
            config.store,
            StoreConfig::Sqlite {
                path: PathBuf::from("fixtures.db")
            }
        );
    }

    #[test]
    fn memory_store_config() {
        let config = Config::from_toml("[store]\ntype = \"memory\"").unwrap();
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config, parsed);
    }
}
