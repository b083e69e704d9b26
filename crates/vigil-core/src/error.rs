//! Error types for the reconciliation engine
//!
//! Two tiers:
//! - Per-record and per-recipient failures ([`ResolveError`], [`DeliveryError`])
//!   are accumulated into the invocation report and never abort a batch.
//! - Invocation-level failures ([`ReconcileError`]) abort the current
//!   invocation and suppress further chaining.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_model::PersonId;

use crate::controller::Phase;

/// Top-level invocation error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconcileError {
    /// Record scan failed; fatal to the invocation
    #[error("scan failed: {0}")]
    Scan(#[source] StoreError),

    /// Conditional write batch failed at the store level
    #[error("persistence failed: {0}")]
    Persistence(#[source] StoreError),

    /// Continuation token could not be decoded
    #[error("invalid continuation token: {0}")]
    Token(#[from] TokenError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Controller attempted a transition its phase table forbids
    #[error("illegal phase transition {from:?} -> {to:?}")]
    IllegalTransition { from: Phase, to: Phase },
}

impl ReconcileError {
    /// Whether a later, manually triggered invocation could succeed unchanged
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Scan(StoreError::Unavailable(_) | StoreError::Throttled(_))
                | Self::Persistence(StoreError::Unavailable(_) | StoreError::Throttled(_))
        )
    }
}

/// Store-level errors (person table or target table)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Provisioned throughput exceeded
    #[error("store throttled request: {0}")]
    Throttled(String),

    /// Store returned something that violates its contract
    #[error("store contract violation: {0}")]
    Contract(String),
}

/// Errors reported by the external fact source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Third-party rate limit hit
    #[error("rate limited by fact source (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Request exceeded its timeout
    #[error("fact source request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport or server-side failure
    #[error("fact source unavailable: {0}")]
    Unavailable(String),

    /// Request refused for a reason retrying will not fix
    #[error("fact source rejected request: {0}")]
    Rejected(String),
}

impl SourceError {
    /// Transient errors are retried with backoff
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// Server-provided hint for the next attempt
    #[inline]
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Per-record resolution failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Record has neither an external id nor a page that maps to one
    #[error("no external identifier resolvable for {0}")]
    NoIdentifier(PersonId),

    /// External source has no facts for the identifier
    #[error("external source has no entry for {external_id}")]
    NotFound { external_id: String },

    /// Transient failures outlasted the retry ceiling
    #[error("fact source still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: SourceError },

    /// Source refused the lookup
    #[error("fact source rejected lookup: {0}")]
    Rejected(String),
}

impl ResolveError {
    /// Report classification
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::NoIdentifier(_) => FailureReason::NoIdentifier,
            Self::NotFound { .. } => FailureReason::NotFound,
            Self::RetriesExhausted { .. } => FailureReason::Transient,
            Self::Rejected(_) => FailureReason::Rejected,
        }
    }
}

/// Why a record counted as failed in an invocation report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoIdentifier,
    NotFound,
    Transient,
    Rejected,
    InvalidRecord,
    WriteFailed,
}

/// Per-recipient delivery failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Publisher refused the message
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// Publisher could not be reached
    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

/// Continuation token decoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    /// Not hex
    #[error("token is not valid hex: {0}")]
    Encoding(#[from] hex::FromHexError),

    /// Hex decoded but the payload is not a token
    #[error("token payload is malformed: {0}")]
    Payload(String),

    /// Token written by an incompatible engine version
    #[error("unsupported token version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    /// Payload does not match its checksum
    #[error("token checksum mismatch")]
    Checksum,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Variable present but unparseable
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    /// Values parse but are inconsistent
    #[error("{0}")]
    Invalid(String),
}

/// Failure to enqueue the next invocation; logged, never fatal
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    #[error("scheduler closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_classification() {
        assert!(SourceError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(SourceError::Unavailable("502".into()).is_transient());
        assert!(SourceError::RateLimited { retry_after: None }.is_transient());
        assert!(!SourceError::Rejected("bad id".into()).is_transient());
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let hint = Duration::from_secs(7);
        assert_eq!(
            SourceError::RateLimited {
                retry_after: Some(hint)
            }
            .retry_after(),
            Some(hint)
        );
        assert_eq!(SourceError::Timeout(hint).retry_after(), None);
    }

    #[test]
    fn resolve_error_reasons() {
        assert_eq!(
            ResolveError::NoIdentifier(PersonId::new("p")).reason(),
            FailureReason::NoIdentifier
        );
        assert_eq!(
            ResolveError::NotFound {
                external_id: "Q1".into()
            }
            .reason(),
            FailureReason::NotFound
        );
        assert_eq!(
            ResolveError::RetriesExhausted {
                attempts: 4,
                last: SourceError::Timeout(Duration::from_secs(1))
            }
            .reason(),
            FailureReason::Transient
        );
    }

    #[test]
    fn reconcile_error_retryable() {
        assert!(ReconcileError::Scan(StoreError::Throttled("x".into())).is_retryable());
        assert!(!ReconcileError::Persistence(StoreError::Contract("x".into())).is_retryable());
        assert!(!ReconcileError::Token(TokenError::Checksum).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ReconcileError::Scan(StoreError::Unavailable("timeout".into()));
        assert_eq!(err.to_string(), "scan failed: store unavailable: timeout");
    }
}
