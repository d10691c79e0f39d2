//! Credential resolver with a bounded TTL cache.
//!
//! Fetched blobs are parsed before they are cached, so an invalid blob is
//! never served from the cache and the next call fetches again.

use super::source::CredentialSource;
use crate::error::DbResult;
use crate::models::{Credential, ResourceKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_CREDENTIAL_TTL_SECS: u64 = 3600;
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// How long a fetched credential may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Fetch on every call.
    Disabled,
    /// Fetch once per key for the lifetime of the resolver.
    FetchOnce,
    /// Reuse for the given duration, then fetch again.
    Ttl(Duration),
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::Ttl(Duration::from_secs(DEFAULT_CREDENTIAL_TTL_SECS))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    credential: Credential,
    cached_at: Instant,
}

/// Resolves resource keys to typed credentials.
#[derive(Debug)]
pub struct CredentialResolver {
    source: Arc<dyn CredentialSource>,
    policy: CachePolicy,
    capacity: usize,
    cache: RwLock<HashMap<ResourceKey, CacheEntry>>,
    fetches: AtomicU64,
}

impl CredentialResolver {
    pub fn new(source: Arc<dyn CredentialSource>, policy: CachePolicy) -> Self {
        Self {
            source,
            policy,
            capacity: DEFAULT_CACHE_CAPACITY,
            cache: RwLock::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Override the maximum number of cached keys (at least 1).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Resolve `key`, serving from the cache when the policy allows.
    pub async fn fetch(&self, key: &ResourceKey) -> DbResult<Credential> {
        if let Some(credential) = self.cached(key).await {
            debug!(resource_key = %key, "Credential cache hit");
            return Ok(credential);
        }

        debug!(
            resource_key = %key,
            source = self.source.name(),
            "Fetching credential from source"
        );
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let raw = self.source.fetch_raw(key).await?;
        let credential = Credential::from_json(key, &raw)?;

        self.store(key, &credential).await;
        Ok(credential)
    }

    /// Drop the cached credential for `key`, if any.
    pub async fn invalidate(&self, key: &ResourceKey) {
        if self.cache.write().await.remove(key).is_some() {
            debug!(resource_key = %key, "Invalidated cached credential");
        }
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    /// Number of credentials currently held, expired entries included.
    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Number of calls that went to the source.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    async fn cached(&self, key: &ResourceKey) -> Option<Credential> {
        let ttl = match self.policy {
            CachePolicy::Disabled => return None,
            CachePolicy::FetchOnce => None,
            CachePolicy::Ttl(ttl) => Some(ttl),
        };

        let cache = self.cache.read().await;
        let entry = cache.get(key)?;
        match ttl {
            Some(ttl) if entry.cached_at.elapsed() >= ttl => {
                debug!(resource_key = %key, "Cached credential expired");
                None
            }
            _ => Some(entry.credential.clone()),
        }
    }

    async fn store(&self, key: &ResourceKey, credential: &Credential) {
        if self.policy == CachePolicy::Disabled {
            return;
        }

        let mut cache = self.cache.write().await;
        if !cache.contains_key(key) && cache.len() >= self.capacity {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.cached_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(resource_key = %oldest, "Evicting oldest cached credential");
                cache.remove(&oldest);
            }
        }

        cache.insert(
            key.clone(),
            CacheEntry {
                credential: credential.clone(),
                cached_at: Instant::now(),
            },
        );
    }
}
