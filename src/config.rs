//! Configuration for mapper-engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::MapperError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mapper-engine")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Scheduled job flags and cadences
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Feature flags and intervals for the background jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Delete expired assignments
    #[serde(default = "default_true")]
    pub enable_assignments_cleanup: bool,

    /// Recompute territories whose maps changed recently, and retry stale views
    #[serde(default = "default_true")]
    pub enable_territory_aggregations: bool,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_mins: u64,

    #[serde(default = "default_aggregates_interval")]
    pub aggregates_interval_mins: u64,
}

fn default_database_file() -> String {
    "mapper.db".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_http_port() -> u16 {
    8090
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    5
}

fn default_aggregates_interval() -> u64 {
    10
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enable_assignments_cleanup: true,
            enable_territory_aggregations: true,
            cleanup_interval_mins: default_cleanup_interval(),
            aggregates_interval_mins: default_aggregates_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            pool_size: default_pool_size(),
            http_port: default_http_port(),
            jobs: JobsConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Reject values the daemon cannot run with
    pub fn validate(&self) -> Result<(), MapperError> {
        if self.database_file.trim().is_empty() {
            return Err(MapperError::Config("database_file cannot be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(MapperError::Config("pool_size must be at least 1".into()));
        }
        if self.jobs.cleanup_interval_mins == 0 || self.jobs.aggregates_interval_mins == 0 {
            return Err(MapperError::Config("job intervals must be at least 1 minute".into()));
        }
        Ok(())
    }

    /// Get SQLite database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            http_port = 9000

            [jobs]
            enable_assignments_cleanup = false
            "#,
        )
        .unwrap();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.database_file, "mapper.db");
        assert!(!config.jobs.enable_assignments_cleanup);
        assert!(config.jobs.enable_territory_aggregations);
        assert_eq!(config.jobs.cleanup_interval_mins, 5);
        assert_eq!(config.jobs.aggregates_interval_mins, 10);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        config.save(config.config_path()).unwrap();

        let loaded = Config::load(config.config_path()).unwrap();
        assert_eq!(loaded.storage_dir, dir.path());
        assert_eq!(loaded.database_path(), dir.path().join("mapper.db"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.jobs.aggregates_interval_mins = 0;
        assert!(matches!(config.validate(), Err(MapperError::Config(_))));

        let config = Config {
            pool_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
