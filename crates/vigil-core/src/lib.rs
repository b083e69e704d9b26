//! Vigil Core - death-notification reconciliation engine
//!
//! Walks a table of tracked people, checks each one against an external
//! knowledge source, writes back what changed, and alerts subscribers when
//! someone has died:
//! - [`RecordScanner`] pages through records with no recorded death
//! - [`FactResolver`] fetches current facts with caching, timeouts and backoff
//! - [`ChangeDetector`] classifies each record as unchanged, updated or died
//! - [`BatchPersister`] writes changes conditioned on the fingerprint read
//! - [`NotificationDispatcher`] fans deaths out to eligible SMS subscribers
//! - [`ContinuationController`] bounds each invocation and chains the next
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vigil_core::prelude::*;
//!
//! # async fn example(deps: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReconcilerConfig::from_env()?;
//! let controller = ContinuationController::new(config, deps)?;
//!
//! let report = controller.invoke(InvocationRequest::default()).await?;
//! println!("processed {} records, more: {}", report.processed, report.has_more_records);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod clock;
pub mod config;
pub mod controller;
pub mod detector;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod persister;
pub mod publish;
pub mod resolver;
pub mod scanner;
pub mod schedule;
pub mod source;
pub mod store;
pub mod token;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ReconcilerConfig, SourceConfig, MAX_WRITE_BATCH};
pub use controller::{
    AbortedInvocation, Collaborators, ContinuationController, InvocationReport, InvocationRequest,
    InvocationStatus, Phase, RecordFailure, RunStats,
};
pub use detector::{ChangeDetector, Detection, ReconciliationOutcome, TrackedField};
pub use dispatcher::{compose_message, DispatchReport, NotificationDispatcher, MAX_MESSAGE_CHARS};
pub use error::{
    ConfigError, DeliveryError, FailureReason, ReconcileError, ResolveError, ScheduleError,
    SourceError, StoreError, TokenError,
};
pub use persister::{BatchPersister, PendingChange, PersistFailure, PersistSummary};
pub use publish::{OutboundMessage, SmsPublisher, SmsType};
pub use resolver::{FactCache, FactResolver, ResolvedFacts, ResolverStats, RetryPolicy};
pub use scanner::{RecordScanner, ScanBatch};
pub use schedule::{ChannelScheduler, InvocationScheduler, NextInvocation};
pub use source::{FactSource, SourceFacts};
pub use store::{ConditionalWrite, PersonStore, ScanPage, TargetStore, WriteStatus};
pub use token::{ContinuationToken, TOKEN_VERSION};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring and driving the engine
    pub use crate::{
        Clock, Collaborators, ContinuationController, FactSource, InvocationReport,
        InvocationRequest, InvocationScheduler, PersonStore, ReconcilerConfig, SmsPublisher,
        SystemClock, TargetStore,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
