//! Configuration management for the execution core
//!
//! TOML file support, environment variable overrides and defaults. Runtime
//! toggles (mmap reads, port depth, ...) live here and are passed into the
//! component constructors; nothing is process-global.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Pipeline executor settings
    #[serde(default)]
    pub executor: ExecutorSection,

    /// Storage collaborator settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Castor worker settings
    #[serde(default)]
    pub castor: CastorConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[executor]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSection {
    /// Maximum rows per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Bounded channel depth between two processors
    #[serde(default = "default_port_capacity")]
    pub port_capacity: usize,

    /// Number of cursor partitions per query
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Query deadline in milliseconds (0 = none)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Aggregate in the pipeline transform instead of the cursors
    #[serde(default)]
    pub pipeline_aggregation: bool,
}

/// `[storage]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Read data files through a memory map
    #[serde(default = "default_true")]
    pub enable_mmap_read: bool,

    /// Entries of the series key/id cache
    #[serde(default = "default_series_cache_capacity")]
    pub series_cache_capacity: usize,
}

/// `[castor]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CastorConfig {
    /// Worker address (`host:port`)
    #[serde(default = "default_castor_address")]
    pub address: String,

    /// Wait bound for one batch in milliseconds
    #[serde(default = "default_castor_timeout_ms")]
    pub timeout_ms: u64,

    /// Idle connections kept open
    #[serde(default = "default_castor_pool_size")]
    pub pool_size: usize,

    /// Largest batch sent in one request (0 = unlimited)
    #[serde(default)]
    pub max_batch_rows: usize,
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of the human format
    #[serde(default)]
    pub json: bool,
}

fn default_chunk_size() -> usize { 1024 }
fn default_port_capacity() -> usize { 1 }
fn default_parallelism() -> usize { num_cpus::get() }
fn default_query_timeout_ms() -> u64 { 30_000 }
fn default_series_cache_capacity() -> usize { 65_536 }
fn default_castor_address() -> String { "127.0.0.1:6666".to_string() }
fn default_castor_timeout_ms() -> u64 { 10_000 }
fn default_castor_pool_size() -> usize { 4 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            port_capacity: default_port_capacity(),
            parallelism: default_parallelism(),
            query_timeout_ms: default_query_timeout_ms(),
            pipeline_aggregation: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enable_mmap_read: true,
            series_cache_capacity: default_series_cache_capacity(),
        }
    }
}

impl Default for CastorConfig {
    fn default() -> Self {
        Self {
            address: default_castor_address(),
            timeout_ms: default_castor_timeout_ms(),
            pool_size: default_castor_pool_size(),
            max_batch_rows: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(path, &contents)
    }

    /// Parse configuration from TOML text; `origin` names it in errors
    pub fn from_toml(origin: &str, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Executor
        if let Some(v) = var("KUBA_EXEC_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.executor.chunk_size = v;
        }
        if let Some(v) = var("KUBA_EXEC_QUERY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.executor.query_timeout_ms = v;
        }

        // Storage
        if let Some(v) = var("KUBA_EXEC_ENABLE_MMAP").and_then(|v| v.parse().ok()) {
            self.storage.enable_mmap_read = v;
        }

        // Castor
        if let Some(addr) = var("KUBA_EXEC_CASTOR_ADDR") {
            self.castor.address = addr;
        }

        // Logging
        if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.chunk_size == 0 {
            return Err(invalid("executor.chunk_size", 0, "must be > 0"));
        }
        if self.executor.chunk_size > 1_000_000 {
            return Err(invalid(
                "executor.chunk_size",
                self.executor.chunk_size,
                "cannot exceed 1M rows",
            ));
        }
        if self.executor.port_capacity == 0 {
            return Err(invalid("executor.port_capacity", 0, "must be > 0"));
        }
        if self.executor.parallelism == 0 {
            return Err(invalid("executor.parallelism", 0, "must be > 0"));
        }
        if self.storage.series_cache_capacity == 0 {
            return Err(invalid("storage.series_cache_capacity", 0, "must be > 0"));
        }
        if self.castor.address.is_empty() {
            return Err(invalid("castor.address", "", "cannot be empty"));
        }
        if self.castor.timeout_ms == 0 {
            return Err(invalid("castor.timeout_ms", 0, "must be > 0"));
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })
    }
}

fn invalid(field: &'static str, value: impl ToString, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.executor.chunk_size, 1024);
        assert_eq!(config.executor.port_capacity, 1);
        assert!(config.storage.enable_mmap_read);
        assert_eq!(config.castor.pool_size, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            "inline",
            "[executor]\nchunk_size = 64\n\n[castor]\naddress = \"10.0.0.5:7000\"\n",
        )
        .unwrap();
        assert_eq!(config.executor.chunk_size, 64);
        assert_eq!(config.executor.query_timeout_ms, 30_000);
        assert_eq!(config.castor.address, "10.0.0.5:7000");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut config = Config::default();
        config.executor.chunk_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("executor.chunk_size"));
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "KUBA_EXEC_CHUNK_SIZE" => Some("256".to_string()),
            "KUBA_EXEC_ENABLE_MMAP" => Some("false".to_string()),
            "KUBA_EXEC_CASTOR_ADDR" => Some("worker:6666".to_string()),
            _ => None,
        });
        assert_eq!(config.executor.chunk_size, 256);
        assert!(!config.storage.enable_mmap_read);
        assert_eq!(config.castor.address, "worker:6666");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exec.toml");
        let path = path.to_str().unwrap();
        let mut config = Config::default();
        config.executor.parallelism = 3;
        config.save_to_file(path).unwrap();
        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded.executor.parallelism, 3);
    }
}
