//! Configuration handling for the pool registry.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::credentials::CachePolicy;
use crate::credentials::resolver::DEFAULT_CREDENTIAL_TTL_SECS;
use crate::credentials::source::DEFAULT_ENV_PREFIX;
use crate::models::{Dialect, ResourceKey};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

// Pool configuration defaults
pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_MAX_OVERFLOW: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RECYCLE_SECS: u64 = 1800;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_SAMPLE_COUNT: usize = 100;
pub const DEFAULT_LOAD_CONCURRENCY: usize = 4;

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Connections the pool is sized for under normal load (default: 5)
    #[arg(long, env = "DBPOOL_POOL_SIZE")]
    pub pool_size: Option<u32>,
    /// Extra connections allowed under load (default: 10)
    #[arg(long, env = "DBPOOL_MAX_OVERFLOW")]
    pub max_overflow: Option<u32>,
    /// Connections kept open even when idle (default: 1)
    #[arg(long, env = "DBPOOL_MIN_CONNECTIONS")]
    pub min_connections: Option<u32>,
    /// Connection acquire timeout in seconds (default: 30)
    #[arg(long = "acquire-timeout", env = "DBPOOL_ACQUIRE_TIMEOUT")]
    pub acquire_timeout_secs: Option<u64>,
    /// Recycle connections older than this many seconds, 0 to disable (default: 1800)
    #[arg(long = "recycle", env = "DBPOOL_RECYCLE")]
    pub recycle_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    #[arg(long, env = "DBPOOL_TEST_BEFORE_ACQUIRE")]
    pub test_before_acquire: Option<bool>,
    /// Close connections idle for this many seconds, 0 to disable (default: 600)
    #[arg(long = "idle-timeout", env = "DBPOOL_IDLE_TIMEOUT")]
    pub idle_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Get pool_size with default value.
    pub fn pool_size_or_default(&self) -> u32 {
        self.pool_size.unwrap_or(DEFAULT_POOL_SIZE)
    }

    /// Get max_overflow with default value.
    pub fn max_overflow_or_default(&self) -> u32 {
        self.max_overflow.unwrap_or(DEFAULT_MAX_OVERFLOW)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get recycle age with default value.
    pub fn recycle_or_default(&self) -> u64 {
        self.recycle_secs.unwrap_or(DEFAULT_RECYCLE_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let pool_size = self.pool_size_or_default();
        if pool_size == 0 {
            return Err("pool_size must be greater than 0".to_string());
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if min > pool_size {
                return Err(format!(
                    "min_connections ({}) cannot exceed pool_size ({})",
                    min, pool_size
                ));
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// The (dialect, resource key) pair an operation runs against.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TargetArgs {
    /// Database dialect (mysql, auroramysql, postgresql, aurorapostgresql, mariadb, ...)
    #[arg(long, env = "DBPOOL_DIALECT")]
    pub dialect: Dialect,

    /// Resource key the credential is stored under
    #[arg(long, env = "DBPOOL_RESOURCE_KEY")]
    pub resource_key: ResourceKey,
}

/// Operation to run against `transaction_records`.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create the transaction_records table if it does not exist
    Initialize(TargetArgs),

    /// Insert randomly generated records
    LoadSampleData {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of records to insert
        #[arg(long, default_value_t = DEFAULT_SAMPLE_COUNT)]
        count: usize,

        /// Concurrent leases used while loading
        #[arg(long, default_value_t = DEFAULT_LOAD_CONCURRENCY)]
        concurrency: usize,
    },

    /// Fetch one random record
    SelectRandom(TargetArgs),

    /// Insert one record (random unless --record is given)
    Insert {
        #[command(flatten)]
        target: TargetArgs,

        /// Record as JSON, without transaction_id
        #[arg(long, value_name = "JSON")]
        record: Option<String>,
    },

    /// Set a new random status on one random record
    UpdateRandomStatus(TargetArgs),

    /// Delete one random record
    DeleteRandom(TargetArgs),

    /// Lease and return one connection, then report pool status
    Ping(TargetArgs),
}

impl Command {
    pub fn target(&self) -> &TargetArgs {
        match self {
            Self::Initialize(target)
            | Self::SelectRandom(target)
            | Self::UpdateRandomStatus(target)
            | Self::DeleteRandom(target)
            | Self::Ping(target) => target,
            Self::LoadSampleData { target, .. } | Self::Insert { target, .. } => target,
        }
    }

    /// Operation name as used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::LoadSampleData { .. } => "load-sample-data",
            Self::SelectRandom(_) => "select-random",
            Self::Insert { .. } => "insert",
            Self::UpdateRandomStatus(_) => "update-random-status",
            Self::DeleteRandom(_) => "delete-random",
            Self::Ping(_) => "ping",
        }
    }
}

/// Configuration for the pool registry CLI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-pool-registry",
    about = "Credential-keyed connection pools and CRUD operations over transaction_records",
    version,
    author
)]
pub struct Config {
    /// JSON file mapping resource keys to credential blobs
    #[arg(long, value_name = "PATH", env = "DBPOOL_CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Prefix of environment variables holding credential blobs
    #[arg(long, default_value = DEFAULT_ENV_PREFIX, env = "DBPOOL_SECRET_ENV_PREFIX")]
    pub secret_env_prefix: String,

    /// Seconds a fetched credential is reused, 0 to fetch on every pool build
    #[arg(
        long,
        default_value_t = DEFAULT_CREDENTIAL_TTL_SECS,
        env = "DBPOOL_CREDENTIAL_TTL"
    )]
    pub credential_ttl: u64,

    /// Fetch each credential once for the lifetime of the process
    #[arg(long, env = "DBPOOL_CREDENTIAL_FETCH_ONCE")]
    pub credential_fetch_once: bool,

    #[command(flatten)]
    pub pool: PoolOptions,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DBPOOL_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DBPOOL_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Credential cache policy selected by the flags.
    pub fn cache_policy(&self) -> CachePolicy {
        if self.credential_fetch_once {
            CachePolicy::FetchOnce
        } else if self.credential_ttl == 0 {
            CachePolicy::Disabled
        } else {
            CachePolicy::Ttl(Duration::from_secs(self.credential_ttl))
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate()?;
        if let Command::LoadSampleData { concurrency: 0, .. } = self.command {
            return Err("concurrency must be greater than 0".to_string());
        }
        Ok(())
    }
}
