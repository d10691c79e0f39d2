//! Credential-keyed pool registry.
//!
//! Lazily builds one pool per (dialect, resource key) pair through a
//! [`PoolBackend`] and hands out leases from it.
//!
//! # Design Decisions
//!
//! - **`OnceCell` per pair**: single-flight pool construction. Concurrent
//!   first callers for the same pair wait for one build; unrelated pairs
//!   never wait on each other past the brief map lookup.
//! - **Bounded construction**: a build (credential fetch plus first
//!   connection) that outlasts the acquire timeout fails with
//!   `PoolInitialization` wrapping `AcquireTimeout`.
//! - **Failed builds leave no trace**: the pair reverts to Absent, its slot is
//!   dropped from the map once no other caller holds it, and the next call
//!   builds again. Errors are never cached.
//!
//! # Concurrency Safety
//!
//! - The map lock is released before any await on pool construction or
//!   leasing; lookups take a read lock, slot creation a write lock with a
//!   double check.
//! - `remove` refuses a pair that is Initializing. `close_all` retires every
//!   slot it drains; a build that finishes on a retired slot closes its own
//!   pool and reports `PoolClosed`.

use crate::config::PoolOptions;
use crate::credentials::CredentialResolver;
use crate::db::backend::{ConnectionTarget, Lease, ManagedPool, PoolBackend};
use crate::db::dialect_registry::DialectRegistry;
use crate::db::pool::{PoolSettings, PoolStatus};
use crate::error::{DbError, DbResult};
use crate::models::{Dialect, ResourceKey};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering, fence};
use tokio::sync::{OnceCell, RwLock as TokioRwLock};
use tracing::{debug, info, warn};

/// Cache key of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub dialect: Dialect,
    pub resource_key: ResourceKey,
}

impl PoolKey {
    pub fn new(dialect: Dialect, resource_key: ResourceKey) -> Self {
        Self {
            dialect,
            resource_key,
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dialect, self.resource_key)
    }
}

/// Lifecycle state of one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Absent,
    Initializing,
    Ready,
}

/// Registry-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Successful pool constructions since the registry was created.
    pub pools_created: u64,
    pub failed_initializations: u64,
    /// Pools currently Ready.
    pub active_pools: usize,
    /// Pairs with a map entry (Initializing or Ready).
    pub tracked_pairs: usize,
}

struct Slot<P> {
    cell: OnceCell<Arc<P>>,
    initializing: AtomicBool,
    /// Set once the slot has left the map through `remove` or `close_all`.
    retired: AtomicBool,
}

impl<P> Slot<P> {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            initializing: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        }
    }

    fn state(&self) -> PoolState {
        if self.cell.initialized() {
            PoolState::Ready
        } else if self.initializing.load(Ordering::Acquire) {
            PoolState::Initializing
        } else {
            PoolState::Absent
        }
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    fn is_retired(&self) -> bool {
        fence(Ordering::SeqCst);
        self.retired.load(Ordering::SeqCst)
    }
}

/// Clears the initializing flag on every exit path, including cancellation.
struct InitializingGuard<'a>(&'a AtomicBool);

impl<'a> InitializingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Process-wide registry of pools keyed by (dialect, resource key).
pub struct PoolRegistry<B: PoolBackend> {
    backend: Arc<B>,
    resolver: Arc<CredentialResolver>,
    dialects: DialectRegistry,
    settings: PoolSettings,
    slots: TokioRwLock<HashMap<PoolKey, Arc<Slot<B::Pool>>>>,
    pools_created: AtomicU64,
    failed_initializations: AtomicU64,
}

impl<B: PoolBackend> PoolRegistry<B> {
    /// Create an empty registry. No pools are built until first use.
    pub fn new(
        backend: Arc<B>,
        resolver: Arc<CredentialResolver>,
        dialects: DialectRegistry,
        options: &PoolOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            resolver,
            dialects,
            settings: PoolSettings::from(options),
            slots: TokioRwLock::new(HashMap::new()),
            pools_created: AtomicU64::new(0),
            failed_initializations: AtomicU64::new(0),
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn resolver(&self) -> &Arc<CredentialResolver> {
        &self.resolver
    }

    pub fn dialects(&self) -> &DialectRegistry {
        &self.dialects
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Lease a connection for the pair, building its pool on first use.
    pub async fn acquire(
        &self,
        dialect: Dialect,
        resource_key: &ResourceKey,
    ) -> DbResult<Lease<B>> {
        self.pool(dialect, resource_key).await?.acquire().await
    }

    /// Lease a connection without waiting for capacity.
    pub async fn try_acquire(
        &self,
        dialect: Dialect,
        resource_key: &ResourceKey,
    ) -> DbResult<Lease<B>> {
        self.pool(dialect, resource_key).await?.try_acquire().await
    }

    /// Get or build the pool for the pair.
    ///
    /// Unregistered dialects fail with `UnsupportedDialect` before anything
    /// is fetched or constructed.
    pub async fn pool(
        &self,
        dialect: Dialect,
        resource_key: &ResourceKey,
    ) -> DbResult<Arc<B::Pool>> {
        if !self.dialects.supports(dialect) {
            return Err(DbError::unsupported_dialect(dialect.display_name()));
        }

        let key = PoolKey::new(dialect, resource_key.clone());
        let slot = self.slot(&key).await;

        if let Some(pool) = slot.cell.get() {
            return self.live(&key, &slot, pool).await;
        }

        // get_or_try_init ensures single-flight pool creation; on error the
        // cell stays empty so a later call retries.
        let built = slot
            .cell
            .get_or_try_init(|| async {
                let _initializing = InitializingGuard::enter(&slot.initializing);
                self.build_pool(&key).await.map(Arc::new)
            })
            .await;

        match built {
            Ok(pool) => self.live(&key, &slot, pool).await,
            Err(e) => {
                self.prune(&key, &slot).await;
                Err(e)
            }
        }
    }

    /// Hand out `pool` unless its slot was retired while it was being built.
    async fn live(
        &self,
        key: &PoolKey,
        slot: &Slot<B::Pool>,
        pool: &Arc<B::Pool>,
    ) -> DbResult<Arc<B::Pool>> {
        if slot.is_retired() {
            debug!(
                dialect = %key.dialect,
                resource_key = %key.resource_key,
                "Pool was torn down while in use, closing it"
            );
            pool.close().await;
            return Err(DbError::pool_closed(
                key.dialect.display_name(),
                key.resource_key.as_str(),
            ));
        }
        Ok(Arc::clone(pool))
    }

    /// Get or create the slot for `key` (double-checked).
    async fn slot(&self, key: &PoolKey) -> Arc<Slot<B::Pool>> {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(key) {
                return Arc::clone(slot);
            }
        }

        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    /// Drop a slot left empty by a failed build, unless another caller
    /// still holds it (they may be about to retry).
    async fn prune(&self, key: &PoolKey, slot: &Arc<Slot<B::Pool>>) {
        let mut slots = self.slots.write().await;
        let unused = slots.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, slot)
                && slot.state() == PoolState::Absent
                // One reference in the map, one held by this caller
                && Arc::strong_count(slot) == 2
        });
        if unused {
            slots.remove(key);
        }
    }

    async fn build_pool(&self, key: &PoolKey) -> DbResult<B::Pool> {
        info!(
            dialect = %key.dialect,
            resource_key = %key.resource_key,
            "Initializing connection pool"
        );

        let timeout = self.settings.acquire_timeout;
        let built = match tokio::time::timeout(timeout, self.construct(key)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::acquire_timeout(
                key.dialect.display_name(),
                key.resource_key.as_str(),
                timeout.as_millis() as u64,
            )),
        };

        match built {
            Ok(pool) => {
                let created = self.pools_created.fetch_add(1, Ordering::AcqRel) + 1;
                info!(
                    dialect = %key.dialect,
                    resource_key = %key.resource_key,
                    capacity = self.settings.capacity(),
                    pools_created = created,
                    "Connection pool ready"
                );
                Ok(pool)
            }
            Err(e) => {
                self.failed_initializations.fetch_add(1, Ordering::AcqRel);
                // A rotated or broken secret should be refetched on retry.
                self.resolver.invalidate(&key.resource_key).await;
                warn!(
                    dialect = %key.dialect,
                    resource_key = %key.resource_key,
                    error = %e,
                    "Connection pool initialization failed"
                );
                Err(DbError::pool_initialization(
                    key.dialect.display_name(),
                    key.resource_key.as_str(),
                    e,
                ))
            }
        }
    }

    async fn construct(&self, key: &PoolKey) -> DbResult<B::Pool> {
        let target = self.target(key).await?;
        self.backend.build(&target, &self.settings).await
    }

    async fn target(&self, key: &PoolKey) -> DbResult<ConnectionTarget> {
        let credential = self.resolver.fetch(&key.resource_key).await?;
        let connection_string = self
            .dialects
            .build_connection_string(key.dialect, &credential)?;
        let admin_connection_string = self
            .dialects
            .admin_connection_string(key.dialect, &credential)?;

        Ok(ConnectionTarget {
            dialect: key.dialect,
            resource_key: key.resource_key.clone(),
            connection_string,
            admin_connection_string,
            credential,
        })
    }

    /// Open a non-pooled administrative connection for dialects that have a
    /// separate control database (MSSQL). The caller owns the connection.
    pub async fn admin_connection(
        &self,
        dialect: Dialect,
        resource_key: &ResourceKey,
    ) -> DbResult<B::Connection> {
        if !self.dialects.supports(dialect) {
            return Err(DbError::unsupported_dialect(dialect.display_name()));
        }

        let key = PoolKey::new(dialect, resource_key.clone());
        let target = self.target(&key).await?;
        let Some(admin) = target.admin_connection_string.as_deref() else {
            return Err(DbError::invalid_input(format!(
                "{} has no administrative connection",
                dialect
            )));
        };

        debug!(
            dialect = %dialect,
            resource_key = %resource_key,
            "Opening administrative connection"
        );
        self.backend.connect(&target, admin).await
    }

    /// Lifecycle state of the pair.
    pub async fn state(&self, dialect: Dialect, resource_key: &ResourceKey) -> PoolState {
        let key = PoolKey::new(dialect, resource_key.clone());
        let slots = self.slots.read().await;
        slots
            .get(&key)
            .map(|slot| slot.state())
            .unwrap_or(PoolState::Absent)
    }

    /// Status of the pair's pool, if it is Ready.
    pub async fn status(&self, dialect: Dialect, resource_key: &ResourceKey) -> Option<PoolStatus> {
        let key = PoolKey::new(dialect, resource_key.clone());
        let slots = self.slots.read().await;
        slots
            .get(&key)
            .and_then(|slot| slot.cell.get())
            .map(|pool| pool.status())
    }

    pub async fn stats(&self) -> RegistryStats {
        let slots = self.slots.read().await;
        RegistryStats {
            pools_created: self.pools_created.load(Ordering::Acquire),
            failed_initializations: self.failed_initializations.load(Ordering::Acquire),
            active_pools: slots.values().filter(|slot| slot.cell.initialized()).count(),
            tracked_pairs: slots.len(),
        }
    }

    /// Get the number of Ready pools.
    pub async fn pool_count(&self) -> usize {
        let slots = self.slots.read().await;
        slots.values().filter(|slot| slot.cell.initialized()).count()
    }

    /// Tear down one pair. Returns true if a Ready pool was closed.
    ///
    /// The pair reverts to Absent; the next acquire builds a new pool. A pair
    /// that is Initializing is left alone and `false` is returned.
    pub async fn remove(&self, dialect: Dialect, resource_key: &ResourceKey) -> bool {
        let key = PoolKey::new(dialect, resource_key.clone());
        let removed = {
            let mut slots = self.slots.write().await;
            match slots.get(&key).map(|slot| slot.state()) {
                None => return false,
                Some(PoolState::Initializing) => {
                    warn!(
                        dialect = %dialect,
                        resource_key = %resource_key,
                        "Refusing to remove a pool that is still initializing"
                    );
                    return false;
                }
                Some(_) => slots.remove(&key),
            }
        }; // Lock released here

        let Some(slot) = removed else {
            return false;
        };
        slot.retire();
        match slot.cell.get() {
            Some(pool) => {
                info!(dialect = %dialect, resource_key = %resource_key, "Removing connection pool");
                pool.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every pool. Builds still in flight close their pool when they
    /// finish.
    pub async fn close_all(&self) {
        // Drain under lock, close outside lock
        let drained: Vec<_> = {
            let mut slots = self.slots.write().await;
            slots.drain().collect()
        };

        for (key, slot) in drained {
            slot.retire();
            if let Some(pool) = slot.cell.get() {
                info!(dialect = %key.dialect, resource_key = %key.resource_key, "Closing connection pool");
                pool.close().await;
            }
        }
    }
}

impl<B: PoolBackend> std::fmt::Debug for PoolRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("settings", &self.settings)
            .field("pools_created", &self.pools_created.load(Ordering::Relaxed))
            .field(
                "failed_initializations",
                &self.failed_initializations.load(Ordering::Relaxed),
            )
            .finish()
    }
}
