//! Error types for the pool registry.
//!
//! This module defines all error types using `thiserror`. Initialization
//! failures wrap their underlying cause so callers can inspect the chain via
//! [`std::error::Error::source`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Credential not found: {resource_key}")]
    CredentialNotFound { resource_key: String },

    #[error("Credential source unavailable for '{resource_key}': {message}")]
    CredentialSourceUnavailable {
        resource_key: String,
        message: String,
    },

    #[error("Invalid credential for '{resource_key}': {message}")]
    InvalidCredential {
        resource_key: String,
        message: String,
    },

    #[error("Unsupported dialect: {dialect}")]
    UnsupportedDialect { dialect: String },

    #[error("Pool initialization failed for {dialect} '{resource_key}': {source}")]
    PoolInitialization {
        dialect: String,
        resource_key: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Pool exhausted for {dialect} '{resource_key}': all {capacity} connections are leased")]
    PoolExhausted {
        dialect: String,
        resource_key: String,
        capacity: usize,
    },

    #[error("Timed out after {waited_ms}ms acquiring a connection for {dialect} '{resource_key}'")]
    AcquireTimeout {
        dialect: String,
        resource_key: String,
        waited_ms: u64,
    },

    #[error("Pool closed: {dialect} '{resource_key}'")]
    PoolClosed {
        dialect: String,
        resource_key: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a credential not found error.
    pub fn credential_not_found(resource_key: impl Into<String>) -> Self {
        Self::CredentialNotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a credential source unavailable error.
    pub fn credential_source_unavailable(
        resource_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CredentialSourceUnavailable {
            resource_key: resource_key.into(),
            message: message.into(),
        }
    }

    /// Create an invalid credential error.
    pub fn invalid_credential(resource_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            resource_key: resource_key.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported dialect error.
    pub fn unsupported_dialect(dialect: impl Into<String>) -> Self {
        Self::UnsupportedDialect {
            dialect: dialect.into(),
        }
    }

    /// Wrap a construction failure for a (dialect, resource key) pair.
    pub fn pool_initialization(
        dialect: impl Into<String>,
        resource_key: impl Into<String>,
        source: DbError,
    ) -> Self {
        Self::PoolInitialization {
            dialect: dialect.into(),
            resource_key: resource_key.into(),
            source: Box::new(source),
        }
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(
        dialect: impl Into<String>,
        resource_key: impl Into<String>,
        capacity: usize,
    ) -> Self {
        Self::PoolExhausted {
            dialect: dialect.into(),
            resource_key: resource_key.into(),
            capacity,
        }
    }

    /// Create an acquire timeout error.
    pub fn acquire_timeout(
        dialect: impl Into<String>,
        resource_key: impl Into<String>,
        waited_ms: u64,
    ) -> Self {
        Self::AcquireTimeout {
            dialect: dialect.into(),
            resource_key: resource_key.into(),
            waited_ms,
        }
    }

    /// Create a pool closed error.
    pub fn pool_closed(dialect: impl Into<String>, resource_key: impl Into<String>) -> Self {
        Self::PoolClosed {
            dialect: dialect.into(),
            resource_key: resource_key.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::PoolInitialization { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// Check if a later call may succeed where this one failed.
    ///
    /// The registry never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CredentialSourceUnavailable { .. }
                | Self::PoolInitialization { .. }
                | Self::PoolExhausted { .. }
                | Self::AcquireTimeout { .. }
                | Self::Connection { .. }
        )
    }

    /// Stable machine-readable code, for mapping onto transport-level failures.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CredentialNotFound { .. } => "credential_not_found",
            Self::CredentialSourceUnavailable { .. } => "credential_source_unavailable",
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::UnsupportedDialect { .. } => "unsupported_dialect",
            Self::PoolInitialization { .. } => "pool_initialization_error",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::AcquireTimeout { .. } => "acquire_timeout",
            Self::PoolClosed { .. } => "pool_closed",
            Self::Connection { .. } => "connection_error",
            Self::Database { .. } => "backend_operation_error",
            Self::Configuration { .. } => "configuration_error",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Internal { .. } => "internal_error",
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Driver pool timed out",
                "Increase the acquire timeout or the pool size",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Driver pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::database(
                format!("Column not found: {}", col),
                None,
                "Run the initialize operation to create the table",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for registry operations.
pub type DbResult<T> = Result<T, DbError>;
