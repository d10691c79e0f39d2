//! sqlx-backed connection pools.
//!
//! One [`PoolEntry`] wraps a typed sqlx pool for one (dialect, resource key)
//! pair. sqlx owns the connection lifecycle: the capacity bound, waiting,
//! health checks before acquire, and retiring idle or aged connections.
//!
//! # Capacity
//!
//! `max_connections` is `pool_size + max_overflow`. Connections above
//! `min_connections` are closed once idle for `idle_timeout`; any connection
//! older than `recycle` is closed on return.

use crate::config::PoolOptions;
use crate::db::backend::{ConnectionTarget, ManagedPool, PoolBackend};
use crate::db::dialect_registry::mask_connection_string;
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, DialectFamily, ResourceKey};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::pool::{PoolConnection, PoolOptions as SqlxPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, MySql, MySqlPool, PgPool, Postgres};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Resolved pool limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Connections the pool is sized for under normal load.
    pub pool_size: usize,
    /// Extra connections allowed under load.
    pub max_overflow: usize,
    /// Connections kept open even when idle.
    pub min_connections: usize,
    pub acquire_timeout: Duration,
    /// Connections older than this are closed instead of reused.
    pub recycle: Option<Duration>,
    /// Idle connections above `min_connections` are closed after this long.
    pub idle_timeout: Option<Duration>,
    pub test_before_acquire: bool,
}

impl PoolSettings {
    /// Maximum number of concurrent leases.
    pub fn capacity(&self) -> usize {
        self.pool_size + self.max_overflow
    }

    /// sqlx pool options for these limits.
    pub fn pool_options<DB: sqlx::Database>(&self) -> SqlxPoolOptions<DB> {
        SqlxPoolOptions::new()
            .max_connections(u32::try_from(self.capacity()).unwrap_or(u32::MAX))
            .min_connections(u32::try_from(self.min_connections).unwrap_or(u32::MAX))
            .acquire_timeout(self.acquire_timeout)
            .max_lifetime(self.recycle)
            .idle_timeout(self.idle_timeout)
            .test_before_acquire(self.test_before_acquire)
    }
}

impl From<&PoolOptions> for PoolSettings {
    fn from(options: &PoolOptions) -> Self {
        let recycle_secs = options.recycle_or_default();
        let idle_secs = options.idle_timeout_or_default();
        Self {
            pool_size: options.pool_size_or_default() as usize,
            max_overflow: options.max_overflow_or_default() as usize,
            min_connections: options.min_connections_or_default() as usize,
            acquire_timeout: Duration::from_secs(options.acquire_timeout_or_default()),
            recycle: (recycle_secs > 0).then(|| Duration::from_secs(recycle_secs)),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            test_before_acquire: options.test_before_acquire_or_default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolOptions::default())
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Open connections (idle + leased).
    pub size: usize,
    pub idle: usize,
    /// Outstanding leases.
    pub in_use: usize,
    pub capacity: usize,
    pub closed: bool,
}

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            DbPool::MySql(pool) => pool.size() as usize,
            DbPool::Postgres(pool) => pool.size() as usize,
        }
    }

    pub fn num_idle(&self) -> usize {
        match self {
            DbPool::MySql(pool) => pool.num_idle(),
            DbPool::Postgres(pool) => pool.num_idle(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::Postgres(pool) => pool.is_closed(),
        }
    }

    /// Take an idle connection without waiting or opening a new one.
    fn try_idle(&self) -> Option<DbConnection> {
        match self {
            DbPool::MySql(pool) => pool.try_acquire().map(DbConnection::MySql),
            DbPool::Postgres(pool) => pool.try_acquire().map(DbConnection::Postgres),
        }
    }
}

/// A leased connection. Returned to its pool on drop.
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
}

impl DbConnection {
    /// Return the connection to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// Close the connection instead of returning it, freeing its slot for
    /// a replacement.
    pub async fn discard(self) {
        let result = match self {
            DbConnection::MySql(conn) => conn.detach().close().await,
            DbConnection::Postgres(conn) => conn.detach().close().await,
        };
        if let Err(e) = result {
            debug!(error = %e, "Error closing discarded connection");
        }
    }
}

/// Non-pooled connection.
#[derive(Debug)]
pub enum DirectConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
}

impl DirectConnection {
    pub async fn close(self) {
        let result = match self {
            DirectConnection::MySql(conn) => conn.close().await,
            DirectConnection::Postgres(conn) => conn.close().await,
        };
        if let Err(e) = result {
            debug!(error = %e, "Error closing connection");
        }
    }
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbConnection::MySql(_) => f.write_str("DbConnection::MySql"),
            DbConnection::Postgres(_) => f.write_str("DbConnection::Postgres"),
        }
    }
}

/// The pool of one pair, with the context its errors report.
#[derive(Debug)]
pub struct PoolEntry {
    pool: DbPool,
    dialect: Dialect,
    resource_key: ResourceKey,
    capacity: usize,
    acquire_timeout: Duration,
}

impl PoolEntry {
    pub fn new(pool: DbPool, target: &ConnectionTarget, settings: &PoolSettings) -> Self {
        Self {
            pool,
            dialect: target.dialect,
            resource_key: target.resource_key.clone(),
            capacity: settings.capacity(),
            acquire_timeout: settings.acquire_timeout,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn resource_key(&self) -> &ResourceKey {
        &self.resource_key
    }

    fn closed_error(&self) -> DbError {
        DbError::pool_closed(self.dialect.display_name(), self.resource_key.as_str())
    }

    fn lease_error(&self, error: sqlx::Error) -> DbError {
        match error {
            sqlx::Error::PoolTimedOut => {
                warn!(
                    dialect = %self.dialect,
                    resource_key = %self.resource_key,
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "Timed out waiting for a connection"
                );
                DbError::acquire_timeout(
                    self.dialect.display_name(),
                    self.resource_key.as_str(),
                    self.acquire_timeout.as_millis() as u64,
                )
            }
            sqlx::Error::PoolClosed => self.closed_error(),
            other => DbError::from(other),
        }
    }
}

#[async_trait]
impl ManagedPool for PoolEntry {
    type Lease = DbConnection;

    async fn acquire(&self) -> DbResult<DbConnection> {
        let result = match &self.pool {
            DbPool::MySql(pool) => pool.acquire().await.map(DbConnection::MySql),
            DbPool::Postgres(pool) => pool.acquire().await.map(DbConnection::Postgres),
        };
        result.map_err(|e| self.lease_error(e))
    }

    /// Takes an idle connection, or opens one while the pool is below
    /// capacity. Two callers racing for the last free slot may both open;
    /// the loser then waits like `acquire`.
    async fn try_acquire(&self) -> DbResult<DbConnection> {
        if self.pool.is_closed() {
            return Err(self.closed_error());
        }
        if let Some(conn) = self.pool.try_idle() {
            return Ok(conn);
        }
        if self.pool.size() < self.capacity {
            return self.acquire().await;
        }
        Err(DbError::pool_exhausted(
            self.dialect.display_name(),
            self.resource_key.as_str(),
            self.capacity,
        ))
    }

    fn status(&self) -> PoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle();
        PoolStatus {
            size,
            idle,
            in_use: size.saturating_sub(idle),
            capacity: self.capacity,
            closed: self.pool.is_closed(),
        }
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    async fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        self.pool.close().await;
        info!(
            dialect = %self.dialect,
            resource_key = %self.resource_key,
            "Closed connection pool"
        );
    }
}

/// Production backend: typed sqlx pools for the MySQL and PostgreSQL
/// protocol families.
#[derive(Debug, Clone, Default)]
pub struct SqlxBackend;

impl SqlxBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn supports(dialect: Dialect) -> bool {
        matches!(
            dialect.family(),
            DialectFamily::MySql | DialectFamily::Postgres
        )
    }

    fn mysql_options(connection_string: &str) -> DbResult<MySqlConnectOptions> {
        Ok(MySqlConnectOptions::from_str(connection_string)
            .map_err(|e| {
                DbError::connection(
                    format!("Invalid MySQL connection string: {}", e),
                    "Check the host, port and database stored for this resource key",
                )
            })?
            .charset("utf8mb4"))
    }

    fn postgres_options(connection_string: &str) -> DbResult<PgConnectOptions> {
        PgConnectOptions::from_str(connection_string).map_err(|e| {
            DbError::connection(
                format!("Invalid PostgreSQL connection string: {}", e),
                "Check the host, port and database stored for this resource key",
            )
        })
    }

    fn connect_error(target: &ConnectionTarget, error: sqlx::Error) -> DbError {
        if matches!(error, sqlx::Error::PoolTimedOut) {
            return DbError::connection(
                format!(
                    "Timed out opening the first connection to {} '{}'",
                    target.dialect, target.resource_key
                ),
                format!(
                    "Check that the {} server is reachable from this host",
                    target.dialect
                ),
            );
        }
        let suggestion = Self::connection_suggestion(target.dialect, &error);
        DbError::connection(
            format!(
                "Failed to connect to {} '{}': {}",
                target.dialect, target.resource_key, error
            ),
            suggestion,
        )
    }

    /// Generate a helpful suggestion for connection errors.
    fn connection_suggestion(dialect: Dialect, error: &sqlx::Error) -> String {
        let error_str = error.to_string().to_lowercase();

        if error_str.contains("connection refused") {
            return format!("Check that the {} server is running and accessible", dialect);
        }

        if error_str.contains("authentication") || error_str.contains("password") {
            return "Verify the username and password stored for this resource key".to_string();
        }

        if error_str.contains("does not exist") || error_str.contains("unknown database") {
            return "Check that the database name in the credential exists".to_string();
        }

        if error_str.contains("tls") || error_str.contains("ssl") {
            return "Check TLS/SSL configuration or try disabling it".to_string();
        }

        format!(
            "Verify the host and port in the credential (default port for {} is {})",
            dialect,
            dialect.default_port()
        )
    }

    fn unsupported(target: &ConnectionTarget) -> DbError {
        warn!(dialect = %target.dialect, "No driver available for dialect");
        DbError::unsupported_dialect(target.dialect.display_name())
    }
}

#[async_trait]
impl PoolBackend for SqlxBackend {
    type Pool = PoolEntry;
    type Connection = DirectConnection;

    async fn build(&self, target: &ConnectionTarget, settings: &PoolSettings) -> DbResult<PoolEntry> {
        if settings.capacity() == 0 {
            return Err(DbError::configuration("Pool capacity must be greater than 0"));
        }

        debug!(
            dialect = %target.dialect,
            resource_key = %target.resource_key,
            url = %mask_connection_string(&target.connection_string),
            capacity = settings.capacity(),
            "Opening connection pool"
        );

        let pool = match target.dialect.family() {
            DialectFamily::MySql => {
                let options = Self::mysql_options(&target.connection_string)?;
                let pool = settings
                    .pool_options::<MySql>()
                    .connect_with(options)
                    .await
                    .map_err(|e| Self::connect_error(target, e))?;
                DbPool::MySql(pool)
            }
            DialectFamily::Postgres => {
                let options = Self::postgres_options(&target.connection_string)?;
                let pool = settings
                    .pool_options::<Postgres>()
                    .connect_with(options)
                    .await
                    .map_err(|e| Self::connect_error(target, e))?;
                DbPool::Postgres(pool)
            }
            _ => return Err(Self::unsupported(target)),
        };

        Ok(PoolEntry::new(pool, target, settings))
    }

    async fn connect(
        &self,
        target: &ConnectionTarget,
        connection_string: &str,
    ) -> DbResult<DirectConnection> {
        match target.dialect.family() {
            DialectFamily::MySql => {
                let options = Self::mysql_options(connection_string)?;
                MySqlConnection::connect_with(&options)
                    .await
                    .map(DirectConnection::MySql)
                    .map_err(|e| Self::connect_error(target, e))
            }
            DialectFamily::Postgres => {
                let options = Self::postgres_options(connection_string)?;
                PgConnection::connect_with(&options)
                    .await
                    .map(DirectConnection::Postgres)
                    .map_err(|e| Self::connect_error(target, e))
            }
            _ => Err(Self::unsupported(target)),
        }
    }
}
