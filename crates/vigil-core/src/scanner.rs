//! Cursor-resumable record scanning
//!
//! Wraps [`PersonStore::scan_unresolved`] with a position that only moves
//! forward. The caller fetches a page, reports each record it attempts, and
//! finally reports whether the page was fully consumed; the position then
//! names the last key whose work is done, which is what a continuation token
//! carries.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use vigil_model::{PersonId, PersonRecord};

use crate::error::StoreError;
use crate::store::PersonStore;

/// One fetched page
#[derive(Debug, Clone, Default)]
pub struct ScanBatch {
    pub records: Vec<PersonRecord>,
}

/// Forward-only scanner over unresolved person records
pub struct RecordScanner {
    store: Arc<dyn PersonStore>,
    position: Option<PersonId>,
    /// Store cursor reported with the most recent page
    pending: Option<PersonId>,
    exhausted: bool,
}

impl RecordScanner {
    /// Scanner starting strictly after `position` (`None` = start of table)
    #[must_use]
    pub fn resume(store: Arc<dyn PersonStore>, position: Option<PersonId>) -> Self {
        Self {
            store,
            position,
            pending: None,
            exhausted: false,
        }
    }

    /// Fetch up to `limit` records after the current position.
    ///
    /// Records at or before the position are dropped, so a store that
    /// ignores its start key cannot cause re-visits.
    ///
    /// # Errors
    /// Propagates the store's [`StoreError`].
    #[instrument(skip(self), fields(after = ?self.position))]
    pub async fn next_page(&mut self, limit: usize) -> Result<ScanBatch, StoreError> {
        if self.exhausted || limit == 0 {
            return Ok(ScanBatch::default());
        }

        let page = self
            .store
            .scan_unresolved(self.position.as_ref(), limit)
            .await?;

        let fetched = page.records.len();
        let mut records: Vec<PersonRecord> = page
            .records
            .into_iter()
            .filter(|r| self.position.as_ref().map_or(true, |pos| &r.id > pos))
            .collect();
        if records.len() != fetched {
            warn!(dropped = fetched - records.len(), "store returned records at or before start key");
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records.truncate(limit);

        self.pending = page.last_evaluated.filter(|key| {
            self.position.as_ref().map_or(true, |pos| key > pos)
        });
        debug!(records = records.len(), more = self.pending.is_some(), "page fetched");

        if records.is_empty() {
            // Everything the store examined was filtered; skip past it.
            match self.pending.take() {
                Some(key) => self.position = Some(key),
                None => self.exhausted = true,
            }
        }
        Ok(ScanBatch { records })
    }

    /// Record that `id` has been attempted
    pub fn advance(&mut self, id: &PersonId) {
        if self.position.as_ref().map_or(true, |pos| id > pos) {
            self.position = Some(id.clone());
        }
    }

    /// Close out the current page.
    ///
    /// With `fully_consumed`, the position jumps to the store's reported
    /// cursor and the scan is exhausted if the store reported none.
    pub fn finish_page(&mut self, fully_consumed: bool) {
        if !fully_consumed {
            self.pending = None;
            return;
        }
        match self.pending.take() {
            Some(key) => self.advance(&key),
            None => self.exhausted = true,
        }
    }

    /// Last key whose work is complete
    #[inline]
    #[must_use]
    pub fn position(&self) -> Option<&PersonId> {
        self.position.as_ref()
    }

    /// Whether unvisited records may remain
    #[inline]
    #[must_use]
    pub fn has_more(&self) -> bool {
        !self.exhausted
    }
}
