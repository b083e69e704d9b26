//! Per-invocation fact cache using moka
//!
//! Caches both lookups the resolver performs: page reference to identifier,
//! and identifier to facts. Authoritative "no such entry" answers are cached
//! alongside hits; transient failures never are.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;

use crate::source::SourceFacts;

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Two-table lookup cache
#[derive(Debug, Clone)]
pub struct FactCache {
    identifiers: Cache<String, Option<String>>,
    facts: Cache<String, Option<SourceFacts>>,
    counters: Arc<Counters>,
}

impl FactCache {
    /// Create a cache holding up to `max_capacity` entries per table
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            identifiers: Cache::new(max_capacity),
            facts: Cache::new(max_capacity),
            counters: Arc::default(),
        }
    }

    /// Cached identifier for a page, or compute and remember it
    pub async fn identifier_or_try_insert_with<E, F, Fut>(
        &self,
        page: &str,
        f: F,
    ) -> Result<Option<String>, E>
    where
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, E>>,
    {
        try_get_or_insert_with(&self.identifiers, &self.counters, page, f).await
    }

    /// Cached facts for an identifier, or compute and remember them
    pub async fn facts_or_try_insert_with<E, F, Fut>(
        &self,
        external_id: &str,
        f: F,
    ) -> Result<Option<SourceFacts>, E>
    where
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<SourceFacts>, E>>,
    {
        try_get_or_insert_with(&self.facts, &self.counters, external_id, f).await
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}

/// Lookups for the same key coalesce: while one caller's `f` is in flight,
/// others wait for its result instead of calling `f` themselves. A caller
/// that did not run `f` counts as a hit.
async fn try_get_or_insert_with<V, E, F, Fut>(
    cache: &Cache<String, V>,
    counters: &Counters,
    key: &str,
    f: F,
) -> Result<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    if let Some(cached) = cache.get(key).await {
        counters.hits.fetch_add(1, Ordering::Relaxed);
        return Ok(cached);
    }

    let ran = AtomicBool::new(false);
    let result = cache
        .try_get_with(key.to_string(), async {
            ran.store(true, Ordering::Relaxed);
            f().await
        })
        .await;
    if ran.load(Ordering::Relaxed) {
        counters.misses.fetch_add(1, Ordering::Relaxed);
    } else {
        counters.hits.fetch_add(1, Ordering::Relaxed);
    }
    result.map_err(|shared| Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone()))
}
