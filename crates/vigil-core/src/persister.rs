//! Conditional batch persistence
//!
//! Writes detected changes in store-sized batches, each conditioned on the
//! fingerprint observed when the record was read. A record modified in the
//! meantime is reported as a conflict, not overwritten.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use vigil_model::{PersonId, PersonRecord};

use crate::config::MAX_WRITE_BATCH;
use crate::detector::ReconciliationOutcome;
use crate::error::StoreError;
use crate::store::{ConditionalWrite, PersonStore, WriteStatus};

/// A detected change awaiting persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub prior: PersonRecord,
    pub next: PersonRecord,
    pub outcome: ReconciliationOutcome,
}

/// Result of persisting a set of changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistSummary {
    /// Changes now durable, in input order
    pub committed: Vec<PendingChange>,
    /// Records whose stored fingerprint moved since they were read
    pub conflicts: Vec<PersonId>,
    /// Item-level failures
    pub failures: Vec<(PersonId, String)>,
}

/// A batch could not be written. Batches before it stay committed and are
/// described by `partial`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error} ({committed} changes already committed)", committed = .partial.committed.len())]
pub struct PersistFailure {
    #[source]
    pub error: StoreError,
    pub partial: PersistSummary,
}

/// Batched conditional writer
pub struct BatchPersister {
    store: Arc<dyn PersonStore>,
    batch_size: usize,
}

impl BatchPersister {
    /// `batch_size` is clamped to `1..=MAX_WRITE_BATCH`
    #[must_use]
    pub fn new(store: Arc<dyn PersonStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.clamp(1, MAX_WRITE_BATCH),
        }
    }

    /// Persist `changes`; unchanged outcomes are skipped.
    ///
    /// # Errors
    /// Returns [`PersistFailure`] if a batch cannot be attempted at all, or if
    /// the store answers with the wrong number of statuses. The failure
    /// carries the summary of the batches committed before it.
    #[instrument(skip_all, fields(changes = changes.len()))]
    pub async fn persist(
        &self,
        changes: Vec<PendingChange>,
    ) -> Result<PersistSummary, PersistFailure> {
        let mut summary = PersistSummary::default();
        let mut pending = changes
            .into_iter()
            .filter(|c| c.outcome.requires_write())
            .peekable();

        while pending.peek().is_some() {
            let batch: Vec<PendingChange> = pending.by_ref().take(self.batch_size).collect();
            let writes = batch
                .iter()
                .map(|change| ConditionalWrite {
                    record: change.next.clone(),
                    expected: change.prior.fingerprint,
                })
                .collect();

            let statuses = match self.store.write_batch(writes).await {
                Ok(statuses) if statuses.len() == batch.len() => statuses,
                Ok(statuses) => {
                    let error = StoreError::Contract(format!(
                        "{} statuses for a batch of {}",
                        statuses.len(),
                        batch.len()
                    ));
                    return Err(PersistFailure {
                        error,
                        partial: summary,
                    });
                }
                Err(error) => {
                    return Err(PersistFailure {
                        error,
                        partial: summary,
                    });
                }
            };

            for (change, status) in batch.into_iter().zip(statuses) {
                match status {
                    WriteStatus::Committed => summary.committed.push(change),
                    WriteStatus::ConditionFailed => {
                        debug!(person = %change.next.id, "record changed since read; skipping");
                        summary.conflicts.push(change.next.id);
                    }
                    WriteStatus::Failed(reason) => {
                        warn!(person = %change.next.id, %reason, "write failed");
                        summary.failures.push((change.next.id, reason));
                    }
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPersonStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use vigil_model::Fingerprint;

    fn change(prior: PersonRecord) -> PendingChange {
        let next = prior.clone().with_age(50).sealed();
        PendingChange {
            prior,
            next,
            outcome: ReconciliationOutcome::Updated { fields: vec![] },
        }
    }

    #[tokio::test]
    async fn commits_and_reports_conflicts() {
        let a = PersonRecord::new("a", "A").sealed();
        let b = PersonRecord::new("b", "B").sealed();
        let store = Arc::new(MemoryPersonStore::with_records([a.clone(), b.clone()]));

        let mut stale = change(b.clone());
        stale.prior.fingerprint = Some(Fingerprint::new([1; 32]));

        let persister = BatchPersister::new(store.clone(), 25);
        let summary = persister.persist(vec![change(a.clone()), stale]).await.unwrap();

        assert_eq!(summary.committed.len(), 1);
        assert_eq!(summary.conflicts, vec![PersonId::new("b")]);
        assert_eq!(store.get(&PersonId::new("a")).unwrap().age, Some(50));
        assert_eq!(store.get(&PersonId::new("b")).unwrap(), b);
    }

    #[tokio::test]
    async fn unchanged_outcomes_are_not_written() {
        let a = PersonRecord::new("a", "A").sealed();
        let store = Arc::new(MemoryPersonStore::with_records([a.clone()]));
        let persister = BatchPersister::new(store, 25);
        let summary = persister
            .persist(vec![PendingChange {
                prior: a.clone(),
                next: a,
                outcome: ReconciliationOutcome::Unchanged,
            }])
            .await
            .unwrap();
        assert_eq!(summary, PersistSummary::default());
    }

    /// Records batch sizes; optionally fails the nth batch
    #[derive(Default)]
    struct Recording {
        batches: Mutex<Vec<usize>>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl PersonStore for Recording {
        async fn scan_unresolved(
            &self,
            _start_after: Option<&PersonId>,
            _limit: usize,
        ) -> Result<crate::store::ScanPage, StoreError> {
            Ok(crate::store::ScanPage::default())
        }

        async fn write_batch(
            &self,
            writes: Vec<ConditionalWrite>,
        ) -> Result<Vec<WriteStatus>, StoreError> {
            let mut batches = self.batches.lock();
            if self.fail_at == Some(batches.len()) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            batches.push(writes.len());
            Ok(vec![WriteStatus::Committed; writes.len()])
        }
    }

    fn changes(n: usize) -> Vec<PendingChange> {
        (0..n)
            .map(|i| change(PersonRecord::new(format!("p{i:03}").as_str(), "x")))
            .collect()
    }

    #[tokio::test]
    async fn splits_into_store_sized_batches() {
        let store = Arc::new(Recording::default());
        let persister = BatchPersister::new(store.clone(), 100);
        let summary = persister.persist(changes(60)).await.unwrap();
        assert_eq!(summary.committed.len(), 60);
        assert_eq!(*store.batches.lock(), vec![25, 25, 10]);
    }

    #[tokio::test]
    async fn batch_failure_carries_earlier_commits() {
        let store = Arc::new(Recording {
            fail_at: Some(1),
            ..Recording::default()
        });
        let persister = BatchPersister::new(store.clone(), 10);
        let err = persister.persist(changes(30)).await.unwrap_err();
        assert_eq!(err.error, StoreError::Unavailable("connection reset".into()));
        assert_eq!(err.partial.committed.len(), 10);
        assert_eq!(err.partial.committed[0].next.id, PersonId::new("p000"));
        assert_eq!(*store.batches.lock(), vec![10]);
    }

    #[tokio::test]
    async fn first_batch_failure_has_nothing_committed() {
        let store = Arc::new(Recording {
            fail_at: Some(0),
            ..Recording::default()
        });
        let persister = BatchPersister::new(store, 10);
        let err = persister.persist(changes(5)).await.unwrap_err();
        assert_eq!(err.partial, PersistSummary::default());
    }
}
