//! In-memory collaborators
//!
//! Used by the local runner and by tests. Semantics mirror the hosted
//! backends: ordered scans with exclusive start keys, per-item conditional
//! writes, and a publisher that records what it was asked to send.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use vigil_model::{NotificationTarget, PersonId, PersonRecord, UserId};

use crate::config::MAX_WRITE_BATCH;
use crate::error::{DeliveryError, SourceError, StoreError};
use crate::publish::{OutboundMessage, SmsPublisher};
use crate::source::{FactSource, SourceFacts};
use crate::store::{ConditionalWrite, PersonStore, ScanPage, TargetStore, WriteStatus};

/// Ordered person table
#[derive(Debug, Default)]
pub struct MemoryPersonStore {
    items: RwLock<BTreeMap<PersonId, PersonRecord>>,
    scans: AtomicU64,
}

impl MemoryPersonStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = PersonRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Insert or replace unconditionally
    pub fn insert(&self, record: PersonRecord) {
        self.items.write().insert(record.id.clone(), record);
    }

    #[must_use]
    pub fn get(&self, id: &PersonId) -> Option<PersonRecord> {
        self.items.read().get(id).cloned()
    }

    /// All records in key order
    #[must_use]
    pub fn snapshot(&self) -> Vec<PersonRecord> {
        self.items.read().values().cloned().collect()
    }

    #[must_use]
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PersonStore for MemoryPersonStore {
    async fn scan_unresolved(
        &self,
        start_after: Option<&PersonId>,
        limit: usize,
    ) -> Result<ScanPage, StoreError> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        let items = self.items.read();
        let mut matching = items
            .values()
            .filter(|r| start_after.map_or(true, |start| &r.id > start))
            .filter(|r| !r.is_deceased());

        let records: Vec<PersonRecord> = matching.by_ref().take(limit).cloned().collect();
        let last_evaluated = match (records.last(), matching.next()) {
            (Some(last), Some(_)) => Some(last.id.clone()),
            _ => None,
        };
        debug!(returned = records.len(), more = last_evaluated.is_some(), "memory scan");
        Ok(ScanPage {
            records,
            last_evaluated,
        })
    }

    async fn write_batch(
        &self,
        writes: Vec<ConditionalWrite>,
    ) -> Result<Vec<WriteStatus>, StoreError> {
        if writes.len() > MAX_WRITE_BATCH {
            return Err(StoreError::Contract(format!(
                "batch of {} exceeds limit of {MAX_WRITE_BATCH}",
                writes.len()
            )));
        }
        let mut items = self.items.write();
        let statuses = writes
            .into_iter()
            .map(|write| match items.get_mut(&write.record.id) {
                None => WriteStatus::Failed(format!("no item with key {}", write.record.id)),
                Some(stored) if stored.fingerprint != write.expected => {
                    WriteStatus::ConditionFailed
                }
                Some(stored) => {
                    *stored = write.record;
                    WriteStatus::Committed
                }
            })
            .collect();
        Ok(statuses)
    }
}

/// Subscriber table
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    targets: RwLock<BTreeMap<UserId, NotificationTarget>>,
}

impl MemoryTargetStore {
    #[must_use]
    pub fn with_targets(targets: impl IntoIterator<Item = NotificationTarget>) -> Self {
        let store = Self::default();
        {
            let mut map = store.targets.write();
            for target in targets {
                map.insert(target.user_id.clone(), target);
            }
        }
        store
    }

    #[must_use]
    pub fn get(&self, user: &UserId) -> Option<NotificationTarget> {
        self.targets.read().get(user).cloned()
    }

    /// All targets in user id order
    #[must_use]
    pub fn snapshot(&self) -> Vec<NotificationTarget> {
        self.targets.read().values().cloned().collect()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn list_targets(&self) -> Result<Vec<NotificationTarget>, StoreError> {
        Ok(self.targets.read().values().cloned().collect())
    }

    async fn mark_notified(&self, user: &UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        match self.targets.write().get_mut(user) {
            Some(target) => {
                target.last_notified = Some(at);
                Ok(())
            }
            None => Err(StoreError::Contract(format!("no target {user}"))),
        }
    }
}

/// Fixed page index and fact table
#[derive(Debug, Default)]
pub struct StaticFactSource {
    pages: HashMap<String, String>,
    facts: HashMap<String, SourceFacts>,
    calls: AtomicU64,
}

impl StaticFactSource {
    #[must_use]
    pub fn new(pages: HashMap<String, String>, facts: HashMap<String, SourceFacts>) -> Self {
        Self {
            pages,
            facts,
            calls: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_page(mut self, page: impl Into<String>, external_id: impl Into<String>) -> Self {
        self.pages.insert(page.into(), external_id.into());
        self
    }

    #[must_use]
    pub fn with_facts(mut self, external_id: impl Into<String>, facts: SourceFacts) -> Self {
        self.facts.insert(external_id.into(), facts);
        self
    }

    /// Total calls served, lookups and fetches combined
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl FactSource for StaticFactSource {
    async fn lookup_identifier(&self, page: &str) -> Result<Option<String>, SourceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.pages.get(page).cloned())
    }

    async fn fetch_facts(&self, external_id: &str) -> Result<Option<SourceFacts>, SourceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.facts.get(external_id).cloned())
    }
}

/// Publisher that records messages instead of sending them
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MemoryPublisher {
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl SmsPublisher for MemoryPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<String, DeliveryError> {
        let mut sent = self.sent.lock();
        sent.push(message.clone());
        let id = format!("msg-{}", sent.len());
        info!(to = %message.phone_number.masked(), %id, "sms recorded");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::Fingerprint;

    fn person(id: &str) -> PersonRecord {
        PersonRecord::new(id, format!("Person {id}"))
    }

    #[tokio::test]
    async fn scan_is_ordered_and_exclusive() {
        let store = MemoryPersonStore::with_records(["c", "a", "b", "d"].map(person));
        let page = store.scan_unresolved(None, 2).await.unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(page.last_evaluated, Some(PersonId::new("b")));

        let page = store
            .scan_unresolved(page.last_evaluated.as_ref(), 2)
            .await
            .unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "d"]);
        assert_eq!(page.last_evaluated, None);
    }

    #[tokio::test]
    async fn scan_skips_deceased() {
        let dead = person("b").with_death_date(chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        let store = MemoryPersonStore::with_records([person("a"), dead, person("c")]);
        let page = store.scan_unresolved(None, 10).await.unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[tokio::test]
    async fn conditional_write_checks_fingerprint() {
        let stored = person("a").with_external_id("Q1").sealed();
        let store = MemoryPersonStore::with_records([stored.clone()]);

        let next = stored.clone().with_age(40).sealed();
        let stale = ConditionalWrite {
            record: next.clone(),
            expected: Some(Fingerprint::new([9; 32])),
        };
        let fresh = ConditionalWrite {
            record: next.clone(),
            expected: stored.fingerprint,
        };
        let statuses = store.write_batch(vec![stale, fresh]).await.unwrap();
        assert_eq!(
            statuses,
            vec![WriteStatus::ConditionFailed, WriteStatus::Committed]
        );
        assert_eq!(store.get(&PersonId::new("a")), Some(next));
    }

    #[tokio::test]
    async fn oversized_batch_rejected() {
        let store = MemoryPersonStore::new();
        let writes = (0..26)
            .map(|i| ConditionalWrite {
                record: person(&format!("p{i}")),
                expected: None,
            })
            .collect();
        assert!(matches!(
            store.write_batch(writes).await,
            Err(StoreError::Contract(_))
        ));
    }

    #[tokio::test]
    async fn mark_notified_stamps_target() {
        let store = MemoryTargetStore::with_targets([NotificationTarget::new("u-1", "+14155550123")]);
        let at = Utc::now();
        store.mark_notified(&UserId::new("u-1"), at).await.unwrap();
        assert_eq!(store.get(&UserId::new("u-1")).unwrap().last_notified, Some(at));
        assert!(store.mark_notified(&UserId::new("nobody"), at).await.is_err());
    }
}
