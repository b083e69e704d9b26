//! Invocation reports

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};
use vigil_model::PersonId;

use crate::error::{FailureReason, ReconcileError};

/// Record counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// Records attempted
    pub processed: u64,
    /// Writes committed (updates and deaths)
    pub updated: u64,
    /// Records that could not be resolved or written
    pub failed: u64,
    /// Alerts delivered
    pub notified: u64,
    /// Writes skipped because the record changed underneath
    pub skipped: u64,
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.updated += rhs.updated;
        self.failed += rhs.failed;
        self.notified += rhs.notified;
        self.skipped += rhs.skipped;
    }
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    /// Next invocation scheduled
    Chained,
    /// Nothing scheduled; `has_more_records` says whether a resume is needed
    Done,
    Aborted,
}

/// One failed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFailure {
    pub person_id: PersonId,
    pub reason: FailureReason,
    pub detail: String,
}

/// Summary returned by every invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationReport {
    pub invocation_id: String,
    /// 1-based position within the pass
    pub invocation: u32,
    pub processed: u64,
    pub updated: u64,
    pub failed: u64,
    pub notified: u64,
    pub skipped: u64,
    pub duration_ms: u64,
    pub has_more_records: bool,
    /// Present whenever `has_more_records` is true
    pub pagination_token: Option<String>,
    pub chained: bool,
    pub status: InvocationStatus,
    /// Counters for the whole pass, this invocation included
    pub totals: RunStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RecordFailure>,
}

impl InvocationReport {
    /// This invocation's counters
    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats {
            processed: self.processed,
            updated: self.updated,
            failed: self.failed,
            notified: self.notified,
            skipped: self.skipped,
        }
    }
}

/// An invocation that stopped on a fatal error
///
/// The report carries the last token that is safe to resume from.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invocation aborted: {error}")]
pub struct AbortedInvocation {
    #[source]
    pub error: ReconcileError,
    pub report: Box<InvocationReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_accumulate() {
        let mut totals = RunStats {
            processed: 10,
            updated: 1,
            ..RunStats::default()
        };
        totals += RunStats {
            processed: 5,
            failed: 2,
            notified: 3,
            ..RunStats::default()
        };
        assert_eq!(
            totals,
            RunStats {
                processed: 15,
                updated: 1,
                failed: 2,
                notified: 3,
                skipped: 0
            }
        );
    }

    #[test]
    fn report_uses_camel_case() {
        let report = InvocationReport {
            invocation_id: "01J3".into(),
            invocation: 1,
            processed: 2,
            updated: 1,
            failed: 1,
            notified: 0,
            skipped: 0,
            duration_ms: 12,
            has_more_records: true,
            pagination_token: Some("ab".into()),
            chained: false,
            status: InvocationStatus::Done,
            totals: RunStats::default(),
            failures: vec![],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["hasMoreRecords"], true);
        assert_eq!(json["paginationToken"], "ab");
        assert_eq!(json["durationMs"], 12);
        assert_eq!(json["status"], "done");
        assert!(json.get("failures").is_none());
    }
}
