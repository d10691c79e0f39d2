//! Integration tests for the pool registry, driven by an in-memory backend.

use async_trait::async_trait;
use db_pool_registry::config::PoolOptions;
use db_pool_registry::credentials::{
    CachePolicy, CredentialResolver, CredentialSource, StaticCredentialSource,
};
use db_pool_registry::db::{
    ConnectionTarget, DialectRegistry, ManagedPool, PoolBackend, PoolRegistry, PoolSettings,
    PoolState, PoolStatus,
};
use db_pool_registry::error::{DbError, DbResult};
use db_pool_registry::models::{Dialect, ResourceKey};
use std::error::Error as _;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_test::{assert_pending, assert_ready, task};

const MYSQL_BLOB: &str =
    r#"{"host":"h","username":"u","password":"p","database":"d","port":3306}"#;
const OTHER_BLOB: &str =
    r#"{"host":"other","username":"u2","password":"p2","database":"d2"}"#;

/// Builds [`MemoryPool`]s and remembers every connection string.
#[derive(Debug, Default)]
struct Counting {
    built: AtomicUsize,
    urls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    /// Builds never finish.
    hang: bool,
}

#[async_trait]
impl PoolBackend for Counting {
    type Pool = MemoryPool;
    type Connection = String;

    async fn build(&self, target: &ConnectionTarget, settings: &PoolSettings) -> DbResult<MemoryPool> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.urls
            .lock()
            .unwrap()
            .push(target.connection_string.clone());
        self.built.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryPool::new(target, settings))
    }

    async fn connect(&self, _: &ConnectionTarget, connection_string: &str) -> DbResult<String> {
        Ok(connection_string.to_string())
    }
}

/// Semaphore-bounded pool with no real connections.
#[derive(Debug)]
struct MemoryPool {
    dialect: Dialect,
    resource_key: ResourceKey,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
    in_use: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl MemoryPool {
    fn new(target: &ConnectionTarget, settings: &PoolSettings) -> Self {
        Self {
            dialect: target.dialect,
            resource_key: target.resource_key.clone(),
            semaphore: Arc::new(Semaphore::new(settings.capacity())),
            capacity: settings.capacity(),
            acquire_timeout: settings.acquire_timeout,
            in_use: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> MemoryLease {
        self.in_use.fetch_add(1, Ordering::SeqCst);
        MemoryLease {
            _permit: permit,
            in_use: Arc::clone(&self.in_use),
        }
    }

    fn closed_error(&self) -> DbError {
        DbError::pool_closed(self.dialect.display_name(), self.resource_key.as_str())
    }
}

#[derive(Debug)]
struct MemoryLease {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ManagedPool for MemoryPool {
    type Lease = MemoryLease;

    async fn acquire(&self) -> DbResult<MemoryLease> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| {
            DbError::acquire_timeout(
                self.dialect.display_name(),
                self.resource_key.as_str(),
                self.acquire_timeout.as_millis() as u64,
            )
        })?
        .map_err(|_| self.closed_error())?;
        Ok(self.lease(permit))
    }

    async fn try_acquire(&self) -> DbResult<MemoryLease> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(self.lease(permit)),
            Err(TryAcquireError::NoPermits) => Err(DbError::pool_exhausted(
                self.dialect.display_name(),
                self.resource_key.as_str(),
                self.capacity,
            )),
            Err(TryAcquireError::Closed) => Err(self.closed_error()),
        }
    }

    fn status(&self) -> PoolStatus {
        let in_use = self.in_use.load(Ordering::SeqCst);
        PoolStatus {
            size: in_use,
            idle: 0,
            in_use,
            capacity: self.capacity,
            closed: self.is_closed(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.semaphore.close();
    }
}

/// Unavailable on the first `failures` fetches, then serves the blob.
#[derive(Debug)]
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl CredentialSource for Flaky {
    async fn fetch_raw(&self, key: &ResourceKey) -> DbResult<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(DbError::credential_source_unavailable(key.as_str(), "throttled"));
        }
        Ok(MYSQL_BLOB.to_string())
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

fn key(s: &str) -> ResourceKey {
    ResourceKey::new(s).unwrap()
}

fn static_source() -> Arc<StaticCredentialSource> {
    Arc::new(
        StaticCredentialSource::new()
            .with_secret(key("/x/MySQL/Credentials"), MYSQL_BLOB)
            .with_secret(key("/y/MySQL/Credentials"), OTHER_BLOB),
    )
}

fn options(pool_size: u32, max_overflow: u32) -> PoolOptions {
    PoolOptions {
        pool_size: Some(pool_size),
        max_overflow: Some(max_overflow),
        acquire_timeout_secs: Some(1),
        ..Default::default()
    }
}

fn registry_with(
    backend: Counting,
    source: Arc<dyn CredentialSource>,
    options: &PoolOptions,
) -> Arc<PoolRegistry<Counting>> {
    let resolver = CredentialResolver::new(source, CachePolicy::Disabled);
    PoolRegistry::new(
        Arc::new(backend),
        Arc::new(resolver),
        DialectRegistry::standard(),
        options,
    )
}

#[tokio::test]
async fn test_first_acquire_builds_pool_from_credential() {
    let registry = registry_with(Counting::default(), static_source(), &options(5, 10));
    let k = key("/x/MySQL/Credentials");

    let lease = registry.acquire(Dialect::MySql, &k).await.unwrap();
    assert_eq!(
        registry.backend().urls.lock().unwrap()[0],
        "mysql://u:p@h:3306/d"
    );
    drop(lease);

    let _second = registry.acquire(Dialect::MySql, &k).await.unwrap();
    let stats = registry.stats().await;
    assert_eq!(stats.pools_created, 1);
    assert_eq!(stats.active_pools, 1);
    assert_eq!(registry.resolver().fetch_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_builds_exactly_once() {
    let backend = Counting {
        delay: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let registry = registry_with(backend, static_source(), &options(5, 45));
    let k = key("/x/MySQL/Credentials");

    let mut handles = Vec::new();
    for _ in 0..32 {
        let registry = Arc::clone(&registry);
        let k = k.clone();
        handles.push(tokio::spawn(async move {
            let lease = registry.acquire(Dialect::MySql, &k).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(lease);
            Ok::<_, DbError>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(registry.stats().await.pools_created, 1);
    assert_eq!(registry.backend().built.load(Ordering::SeqCst), 1);
    // Caching is disabled, so one fetch means one construction
    assert_eq!(registry.resolver().fetch_count(), 1);
    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Ready);
}

#[tokio::test]
async fn test_state_is_initializing_while_building() {
    let gate = Arc::new(Notify::new());
    let backend = Counting {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let registry = registry_with(backend, static_source(), &options(5, 10));
    let k = key("/x/MySQL/Credentials");

    let building = {
        let registry = Arc::clone(&registry);
        let k = k.clone();
        tokio::spawn(async move { registry.pool(Dialect::MySql, &k).await.map(|_| ()) })
    };

    while registry.state(Dialect::MySql, &k).await != PoolState::Initializing {
        tokio::task::yield_now().await;
    }
    gate.notify_one();
    building.await.unwrap().unwrap();

    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Ready);
}

#[tokio::test]
async fn test_failed_build_leaves_pair_absent_and_retries() {
    let source = Arc::new(Flaky {
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let registry = registry_with(Counting::default(), source.clone(), &options(5, 10));
    let k = key("/x/MySQL/Credentials");

    let err = registry.acquire(Dialect::MySql, &k).await.unwrap_err();
    assert!(matches!(err, DbError::PoolInitialization { .. }));
    assert!(err.is_retryable());
    let cause = err.source().unwrap().to_string();
    assert!(cause.contains("throttled"), "{}", cause);

    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Absent);
    let stats = registry.stats().await;
    assert_eq!(stats.failed_initializations, 1);
    assert_eq!(stats.pools_created, 0);
    assert_eq!(stats.tracked_pairs, 0);

    registry.acquire(Dialect::MySql, &k).await.unwrap();
    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Ready);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_credential_fails_initialization() {
    let registry = registry_with(Counting::default(), static_source(), &options(5, 10));

    let err = registry
        .acquire(Dialect::MySql, &key("/missing"))
        .await
        .unwrap_err();
    match err {
        DbError::PoolInitialization { source, .. } => {
            assert!(matches!(*source, DbError::CredentialNotFound { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_distinct_keys_get_independent_pools() {
    let registry = registry_with(Counting::default(), static_source(), &options(5, 10));
    let x = key("/x/MySQL/Credentials");
    let y = key("/y/MySQL/Credentials");

    let _a = registry.acquire(Dialect::MySql, &x).await.unwrap();
    let _b = registry.acquire(Dialect::MySql, &y).await.unwrap();
    let _c = registry.acquire(Dialect::PostgreSql, &x).await.unwrap();

    let stats = registry.stats().await;
    assert_eq!(stats.pools_created, 3);
    assert_eq!(stats.active_pools, 3);

    let urls = registry.backend().urls.lock().unwrap().clone();
    assert!(urls.contains(&"mysql://u2:p2@other:3306/d2".to_string()));
    assert!(urls.contains(&"postgres://u:p@h:3306/d".to_string()));

    assert_eq!(registry.status(Dialect::MySql, &x).await.unwrap().in_use, 1);
    assert_eq!(registry.status(Dialect::MySql, &y).await.unwrap().in_use, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leases_never_exceed_capacity() {
    let registry = registry_with(Counting::default(), static_source(), &options(2, 1));
    let k = key("/x/MySQL/Credentials");
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..24 {
        let registry = Arc::clone(&registry);
        let k = k.clone();
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            let lease = registry.acquire(Dialect::MySql, &k).await.unwrap();
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            drop(lease);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    let status = registry.status(Dialect::MySql, &k).await.unwrap();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.capacity, 3);
}

#[tokio::test]
async fn test_try_acquire_reports_exhaustion() {
    let registry = registry_with(Counting::default(), static_source(), &options(1, 1));
    let k = key("/x/MySQL/Credentials");

    let _a = registry.try_acquire(Dialect::MySql, &k).await.unwrap();
    let _b = registry.try_acquire(Dialect::MySql, &k).await.unwrap();
    let err = registry.try_acquire(Dialect::MySql, &k).await.unwrap_err();
    assert!(matches!(err, DbError::PoolExhausted { capacity: 2, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout_leaves_counts_unchanged() {
    let registry = registry_with(Counting::default(), static_source(), &options(1, 0));
    let k = key("/x/MySQL/Credentials");

    let _held = registry.acquire(Dialect::MySql, &k).await.unwrap();
    let err = registry.acquire(Dialect::MySql, &k).await.unwrap_err();
    assert!(matches!(err, DbError::AcquireTimeout { waited_ms: 1000, .. }));

    let status = registry.status(Dialect::MySql, &k).await.unwrap();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.capacity, 1);
}

#[tokio::test]
async fn test_closed_registry_rebuilds_on_next_use() {
    let registry = registry_with(Counting::default(), static_source(), &options(5, 10));
    let k = key("/x/MySQL/Credentials");

    let pool = registry.pool(Dialect::MySql, &k).await.unwrap();
    registry.close_all().await;
    assert!(pool.is_closed());
    assert!(matches!(
        pool.acquire().await.unwrap_err(),
        DbError::PoolClosed { .. }
    ));

    registry.acquire(Dialect::MySql, &k).await.unwrap();
    assert_eq!(registry.stats().await.pools_created, 2);
}

#[tokio::test]
async fn test_acquire_waits_for_release() {
    let registry = registry_with(Counting::default(), static_source(), &options(1, 0));
    let k = key("/x/MySQL/Credentials");

    let held = registry.acquire(Dialect::MySql, &k).await.unwrap();
    let mut waiter = task::spawn(registry.acquire(Dialect::MySql, &k));
    assert_pending!(waiter.poll());

    drop(held);
    assert!(waiter.is_woken());
    let lease = assert_ready!(waiter.poll()).unwrap();
    assert_eq!(registry.status(Dialect::MySql, &k).await.unwrap().in_use, 1);
    drop(lease);
}

#[tokio::test(start_paused = true)]
async fn test_hung_build_fails_after_acquire_timeout() {
    let backend = Counting {
        hang: true,
        ..Default::default()
    };
    let registry = registry_with(backend, static_source(), &options(5, 10));
    let k = key("/x/MySQL/Credentials");

    let err = registry.acquire(Dialect::MySql, &k).await.unwrap_err();
    match err {
        DbError::PoolInitialization { source, .. } => {
            assert!(matches!(*source, DbError::AcquireTimeout { waited_ms: 1000, .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Absent);
    let stats = registry.stats().await;
    assert_eq!(stats.failed_initializations, 1);
    assert_eq!(stats.pools_created, 0);
    assert_eq!(stats.tracked_pairs, 0);
}

#[tokio::test]
async fn test_failed_pairs_are_not_tracked() {
    let registry = registry_with(Counting::default(), static_source(), &options(5, 10));

    for i in 0..50 {
        let missing = key(&format!("/missing/{}", i));
        registry.acquire(Dialect::MySql, &missing).await.unwrap_err();
    }

    let stats = registry.stats().await;
    assert_eq!(stats.failed_initializations, 50);
    assert_eq!(stats.tracked_pairs, 0);
}

#[tokio::test]
async fn test_remove_refuses_initializing_pair() {
    let gate = Arc::new(Notify::new());
    let backend = Counting {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let registry = registry_with(backend, static_source(), &options(5, 10));
    let k = key("/x/MySQL/Credentials");

    let building = {
        let registry = Arc::clone(&registry);
        let k = k.clone();
        tokio::spawn(async move { registry.pool(Dialect::MySql, &k).await.map(|_| ()) })
    };
    while registry.state(Dialect::MySql, &k).await != PoolState::Initializing {
        tokio::task::yield_now().await;
    }

    assert!(!registry.remove(Dialect::MySql, &k).await);
    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Initializing);

    gate.notify_one();
    building.await.unwrap().unwrap();
    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Ready);
    assert_eq!(registry.stats().await.pools_created, 1);

    assert!(registry.remove(Dialect::MySql, &k).await);
    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Absent);
}

#[tokio::test]
async fn test_close_all_retires_in_flight_build() {
    let gate = Arc::new(Notify::new());
    let backend = Counting {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    };
    let registry = registry_with(backend, static_source(), &options(5, 10));
    let k = key("/x/MySQL/Credentials");

    let building = {
        let registry = Arc::clone(&registry);
        let k = k.clone();
        tokio::spawn(async move { registry.pool(Dialect::MySql, &k).await.map(|_| ()) })
    };
    while registry.state(Dialect::MySql, &k).await != PoolState::Initializing {
        tokio::task::yield_now().await;
    }

    registry.close_all().await;
    assert_eq!(registry.stats().await.tracked_pairs, 0);

    gate.notify_one();
    let err = building.await.unwrap().unwrap_err();
    assert!(matches!(err, DbError::PoolClosed { .. }));
    assert_eq!(registry.state(Dialect::MySql, &k).await, PoolState::Absent);
    assert_eq!(registry.stats().await.active_pools, 0);

    // The next caller gets a fresh pool
    registry.acquire(Dialect::MySql, &k).await.unwrap();
    assert_eq!(registry.stats().await.pools_created, 2);
}
