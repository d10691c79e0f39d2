//! Pool-builder seam.
//!
//! The registry owns keying, single-flight construction and teardown. A
//! [`PoolBackend`] owns everything below that: it turns a resolved
//! [`ConnectionTarget`] into a [`ManagedPool`] that hands out leases. The
//! production backend is [`SqlxBackend`](crate::db::pool::SqlxBackend);
//! tests plug in in-memory pools.

use crate::db::dialect_registry::mask_connection_string;
use crate::db::pool::{PoolSettings, PoolStatus};
use crate::error::DbResult;
use crate::models::{Credential, Dialect, ResourceKey};
use async_trait::async_trait;

/// Everything needed to open connections for one (dialect, resource key) pair.
#[derive(Clone)]
pub struct ConnectionTarget {
    pub dialect: Dialect,
    pub resource_key: ResourceKey,
    /// Pooled connection string (sensitive - not logged).
    pub connection_string: String,
    /// Administrative connection string, for dialects that have one.
    pub admin_connection_string: Option<String>,
    pub credential: Credential,
}

impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("dialect", &self.dialect)
            .field("resource_key", &self.resource_key)
            .field(
                "connection_string",
                &mask_connection_string(&self.connection_string),
            )
            .field(
                "admin_connection_string",
                &self
                    .admin_connection_string
                    .as_deref()
                    .map(mask_connection_string),
            )
            .field("credential", &self.credential)
            .finish()
    }
}

/// Builds pools and one-off connections for targets.
#[async_trait]
pub trait PoolBackend: Send + Sync + 'static {
    type Pool: ManagedPool;
    /// Non-pooled connection, used for administrative sessions.
    type Connection: Send + 'static;

    /// Build a pool for `target`. Returns once the pool can serve leases.
    async fn build(
        &self,
        target: &ConnectionTarget,
        settings: &PoolSettings,
    ) -> DbResult<Self::Pool>;

    /// Open a single connection outside any pool.
    async fn connect(
        &self,
        target: &ConnectionTarget,
        connection_string: &str,
    ) -> DbResult<Self::Connection>;
}

/// A bounded pool for one pair.
///
/// `acquire` waits up to the pool's acquire timeout and fails with
/// `AcquireTimeout`; `try_acquire` never waits for capacity and fails with
/// `PoolExhausted`. Both fail with `PoolClosed` once `close` has run.
#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    /// A leased connection, returned to the pool when dropped.
    type Lease: Send + 'static;

    async fn acquire(&self) -> DbResult<Self::Lease>;

    async fn try_acquire(&self) -> DbResult<Self::Lease>;

    fn status(&self) -> PoolStatus;

    fn is_closed(&self) -> bool;

    /// Stop handing out leases and close idle connections. Idempotent.
    async fn close(&self);
}

/// Lease type handed out by the pools of backend `B`.
pub type Lease<B> = <<B as PoolBackend>::Pool as ManagedPool>::Lease;
