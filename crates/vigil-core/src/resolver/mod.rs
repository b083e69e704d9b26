//! Fact resolution
//!
//! Maps a person record to the facts the external source currently reports,
//! in one or two calls: an optional page-to-identifier lookup, then a fact
//! fetch. Both are cached for the life of the resolver, bounded by a
//! per-call timeout, and retried with exponential backoff while the source
//! reports transient trouble.

mod cache;
mod retry;

pub use cache::{CacheStats, FactCache};
pub use retry::RetryPolicy;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument, warn};
use vigil_model::PersonRecord;

use crate::error::{ResolveError, SourceError};
use crate::source::FactSource;

/// Facts resolved for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFacts {
    pub external_id: String,
    pub external_page: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
}

/// Resolver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Source calls attempted, retries included
    pub source_calls: u64,
    /// Retries after transient failures
    pub retries: u64,
    pub cache: CacheStats,
}

/// Fact resolver with a private cache
pub struct FactResolver {
    source: Arc<dyn FactSource>,
    cache: FactCache,
    policy: RetryPolicy,
    source_calls: AtomicU64,
    retries: AtomicU64,
}

impl FactResolver {
    #[must_use]
    pub fn new(source: Arc<dyn FactSource>, cache: FactCache, policy: RetryPolicy) -> Self {
        Self {
            source,
            cache,
            policy,
            source_calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// Resolve current facts for `record`.
    ///
    /// # Errors
    /// - [`ResolveError::NoIdentifier`] if the record has no usable id or page
    /// - [`ResolveError::NotFound`] if the source has no entry
    /// - [`ResolveError::RetriesExhausted`] if transient failures outlast the
    ///   retry ceiling
    /// - [`ResolveError::Rejected`] if the source refuses the request
    #[instrument(skip(self, record), fields(person = %record.id))]
    pub async fn resolve(&self, record: &PersonRecord) -> Result<ResolvedFacts, ResolveError> {
        let known_id = non_blank(record.external_id.as_deref());
        let page = non_blank(record.external_page.as_deref());

        let external_id = match (known_id, page) {
            (Some(id), _) => id.to_string(),
            (None, Some(page)) => self
                .identifier_for(page)
                .await?
                .ok_or_else(|| ResolveError::NoIdentifier(record.id.clone()))?,
            (None, None) => return Err(ResolveError::NoIdentifier(record.id.clone())),
        };

        let facts = self
            .facts_for(&external_id)
            .await?
            .ok_or_else(|| ResolveError::NotFound {
                external_id: external_id.clone(),
            })?;

        debug!(%external_id, birth = ?facts.birth_date, death = ?facts.death_date, "resolved");
        Ok(ResolvedFacts {
            external_page: facts.canonical_page.or_else(|| page.map(str::to_string)),
            external_id,
            birth_date: facts.birth_date,
            death_date: facts.death_date,
        })
    }

    #[must_use]
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            source_calls: self.source_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }

    async fn identifier_for(&self, page: &str) -> Result<Option<String>, ResolveError> {
        self.cache
            .identifier_or_try_insert_with(page, || {
                self.call_with_retry("lookup_identifier", page, || {
                    self.source.lookup_identifier(page)
                })
            })
            .await
    }

    async fn facts_for(
        &self,
        external_id: &str,
    ) -> Result<Option<crate::source::SourceFacts>, ResolveError> {
        self.cache
            .facts_or_try_insert_with(external_id, || {
                self.call_with_retry("fetch_facts", external_id, || {
                    self.source.fetch_facts(external_id)
                })
            })
            .await
    }

    async fn call_with_retry<T, F, Fut>(
        &self,
        op: &'static str,
        key: &str,
        mut call: F,
    ) -> Result<T, ResolveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut retry = 0u32;
        loop {
            self.source_calls.fetch_add(1, Ordering::Relaxed);
            let outcome = tokio::time::timeout(self.policy.request_timeout, call())
                .await
                .unwrap_or(Err(SourceError::Timeout(self.policy.request_timeout)));

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(SourceError::Rejected(reason)) => return Err(ResolveError::Rejected(reason)),
                Err(err) => err,
            };

            if !self.policy.allows_retry(retry) {
                warn!(op, key, attempts = retry + 1, error = %err, "giving up on fact source");
                return Err(ResolveError::RetriesExhausted {
                    attempts: retry + 1,
                    last: err,
                });
            }

            let delay = self.policy.delay_for(retry, err.retry_after());
            debug!(op, key, retry, ?delay, error = %err, "transient fact source failure");
            tokio::time::sleep(delay).await;
            self.retries.fetch_add(1, Ordering::Relaxed);
            retry += 1;
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
