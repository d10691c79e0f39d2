//! Connection layer.
//!
//! - Dialect registry: connection-string grammars per dialect
//! - Backend: pool-builder seam used by the registry
//! - Pool: sqlx-backed pools for the MySQL and PostgreSQL families
//! - Pool registry: one lazily built pool per (dialect, resource key)

pub mod backend;
pub mod dialect_registry;
pub mod pool;
pub mod registry;

pub use backend::{ConnectionTarget, Lease, ManagedPool, PoolBackend};
pub use dialect_registry::{DialectRegistry, DialectSpec, mask_connection_string};
pub use pool::{
    DbConnection, DbPool, DirectConnection, PoolEntry, PoolSettings, PoolStatus, SqlxBackend,
};
pub use registry::{PoolKey, PoolRegistry, PoolState, RegistryStats};
