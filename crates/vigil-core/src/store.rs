//! Persistent store collaborators
//!
//! The person table is scanned in ascending key order for records with no
//! recorded death and written through fingerprint-conditioned batches. The
//! target table lists subscribers and records notification stamps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_model::{Fingerprint, NotificationTarget, PersonId, PersonRecord, UserId};

use crate::error::StoreError;

/// One page of a filtered scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Matching records, ascending by key
    pub records: Vec<PersonRecord>,
    /// Last key the store examined; `None` when the table is exhausted.
    ///
    /// May lie beyond the last returned record (filtered items) or be set on
    /// an empty page.
    pub last_evaluated: Option<PersonId>,
}

/// A write applied only if the stored fingerprint still matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalWrite {
    pub record: PersonRecord,
    /// Fingerprint observed at read time; `None` means "stored item has none"
    pub expected: Option<Fingerprint>,
}

/// Per-item result of a conditional batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Committed,
    /// Item changed since it was read
    ConditionFailed,
    /// Item-level failure unrelated to the condition
    Failed(String),
}

/// The person table
#[async_trait]
pub trait PersonStore: Send + Sync {
    /// Up to `limit` records without a death date whose key is strictly
    /// greater than `start_after`.
    async fn scan_unresolved(
        &self,
        start_after: Option<&PersonId>,
        limit: usize,
    ) -> Result<ScanPage, StoreError>;

    /// Apply a batch of conditional writes.
    ///
    /// Returns one status per write, in order. `Err` means the batch as a
    /// whole could not be attempted.
    async fn write_batch(&self, writes: Vec<ConditionalWrite>)
        -> Result<Vec<WriteStatus>, StoreError>;
}

/// The subscriber table
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<NotificationTarget>, StoreError>;

    async fn mark_notified(&self, user: &UserId, at: DateTime<Utc>) -> Result<(), StoreError>;
}
