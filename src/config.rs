//! Server configuration loaded from a TOML file.
//!
//! Every setting has a default so the server can start without a file for
//! local development. Example:
//!
//! ```toml
//! listen = "0.0.0.0:4000"
//! session_ttl_hours = 24
//! history_limit = 100
//! admins = ["root"]
//!
//! [storage]
//! backend = "sqlite"
//! path = "roomchat.db"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::session::DEFAULT_SESSION_TTL_HOURS;
use crate::store::{MemoryStore, SqliteStore, StoreError, Stores};

/// Default capacity of each connection's outbound queue
pub const DEFAULT_OUTBOUND_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Where persistent state lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Process memory; everything is lost on restart
    #[default]
    Memory,
    /// A single SQLite file
    Sqlite { path: PathBuf },
}

impl StorageConfig {
    pub fn open(&self) -> Result<Stores, StoreError> {
        match self {
            StorageConfig::Memory => Ok(Stores::shared(Arc::new(MemoryStore::new()))),
            StorageConfig::Sqlite { path } => Ok(Stores::shared(Arc::new(SqliteStore::open(path)?))),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// `host:port` to listen on; the `--server` flag takes precedence.
    pub listen: Option<String>,

    pub storage: StorageConfig,

    /// Lifetime of a session token.
    pub session_ttl_hours: i64,

    /// Maximum messages returned by one history backfill.
    pub history_limit: usize,

    /// Users whose privileged joins bypass room capacity.
    pub admins: Vec<String>,

    /// Per-connection outbound queue size.
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            storage: StorageConfig::Memory,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            admins: Vec::new(),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl ServerConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl_hours <= 0 {
            return Err(ConfigError::Invalid(
                "session_ttl_hours must be positive".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid("history_limit must be positive".to_string()));
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::Invalid("outbound_queue must be positive".to_string()));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.iter().any(|admin| admin == username)
    }
}
