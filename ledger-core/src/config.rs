//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// World state backend
    pub backend: Backend,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Query configuration
    pub query: QueryConfig,

    /// Retry configuration
    pub retry: RetryConfig,

    /// Commit actor configuration
    pub actor: ActorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "land-registry-ledger".to_string(),
            backend: Backend::default(),
            rocksdb: RocksDBConfig::default(),
            query: QueryConfig::default(),
            retry: RetryConfig::default(),
            actor: ActorConfig::default(),
        }
    }
}

/// World state backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process maps, lost on restart
    Memory,
    /// RocksDB under `data_dir`
    #[default]
    Rocksdb,
}

impl std::str::FromStr for Backend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "rocksdb" | "rocks" => Ok(Backend::Rocksdb),
            other => Err(crate::Error::Config(format!("unknown backend {:?}", other))),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Bloom filter bits per key for the state column family
    pub bloom_bits_per_key: f64,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            bloom_bits_per_key: 10.0,
            enable_statistics: false,
        }
    }
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Entries fetched from the store per page by lazy iterators
    pub page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

/// Retry configuration for optimistic concurrency conflicts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per submission, including the first
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// Commit actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
        }
    }
}

impl Config {
    /// In-memory configuration, used by tests and ephemeral nodes
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            ..Self::default()
        }
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("LEDGER_BACKEND") {
            config.backend = backend.parse()?;
        }

        if let Ok(page_size) = std::env::var("LEDGER_PAGE_SIZE") {
            config.query.page_size = page_size.parse().map_err(|_| {
                crate::Error::Config(format!("LEDGER_PAGE_SIZE is not a number: {}", page_size))
            })?;
        }

        if let Ok(attempts) = std::env::var("LEDGER_MAX_RETRIES") {
            config.retry.max_attempts = attempts.parse().map_err(|_| {
                crate::Error::Config(format!("LEDGER_MAX_RETRIES is not a number: {}", attempts))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall iterators or the actor
    pub fn validate(&self) -> crate::Result<()> {
        if self.query.page_size == 0 {
            return Err(crate::Error::Config("query.page_size must be positive".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config("retry.max_attempts must be positive".to_string()));
        }
        if self.actor.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "actor.mailbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "land-registry-ledger");
        assert_eq!(config.backend, Backend::Rocksdb);
        assert_eq!(config.query.page_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            backend = "memory"

            [query]
            page_size = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.query.page_size, 7);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 9\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 9);

        std::fs::write(&path, "[query]\npage_size = 0\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
        assert_eq!("RocksDB".parse::<Backend>().unwrap(), Backend::Rocksdb);
        assert!("sled".parse::<Backend>().is_err());
    }
}
