//! Invocation control
//!
//! One call to [`ContinuationController::invoke`] runs a bounded slice of a
//! reconciliation pass:
//!
//! 1. decode the continuation token (or start a fresh pass)
//! 2. scan pages of unresolved records after the token's cursor
//! 3. resolve and classify each record, stopping new work once the record or
//!    time budget is spent
//! 4. persist the page's changes conditionally, then alert on committed deaths
//! 5. report, and schedule the next invocation if work remains
//!
//! The token emitted at the end only ever names keys whose writes have
//! landed. When an invocation aborts, its report carries the token from the
//! start of the failing page.

mod phase;
mod report;

pub use phase::{allowed_transitions, validate_transition, Phase, PhaseTracker};
pub use report::{AbortedInvocation, InvocationReport, InvocationStatus, RecordFailure, RunStats};

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, warn, Span};
use ulid::Ulid;
use vigil_model::{PersonId, PersonRecord};

use crate::clock::Clock;
use crate::config::ReconcilerConfig;
use crate::detector::{ChangeDetector, Detection, ReconciliationOutcome};
use crate::dispatcher::NotificationDispatcher;
use crate::error::{ConfigError, FailureReason, ReconcileError};
use crate::persister::{BatchPersister, PendingChange, PersistFailure};
use crate::publish::SmsPublisher;
use crate::resolver::{FactCache, FactResolver, RetryPolicy};
use crate::scanner::RecordScanner;
use crate::schedule::{InvocationScheduler, NextInvocation};
use crate::source::FactSource;
use crate::store::{PersonStore, TargetStore};
use crate::token::ContinuationToken;

/// Invocation input, as delivered by a trigger or a chained call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    #[serde(default)]
    pub pagination_token: Option<String>,
    /// Overrides the configured page size for this invocation
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// Everything the controller talks to
#[derive(Clone)]
pub struct Collaborators {
    pub people: Arc<dyn PersonStore>,
    pub targets: Arc<dyn TargetStore>,
    pub source: Arc<dyn FactSource>,
    pub publisher: Arc<dyn SmsPublisher>,
    pub scheduler: Arc<dyn InvocationScheduler>,
    pub clock: Arc<dyn Clock>,
}

/// Drives invocations of a reconciliation pass
pub struct ContinuationController {
    config: ReconcilerConfig,
    deps: Collaborators,
}

/// Per-invocation components; caches and dedupe sets die with it
struct Pipeline {
    resolver: FactResolver,
    detector: ChangeDetector,
    persister: BatchPersister,
    dispatcher: NotificationDispatcher,
    today: NaiveDate,
}

/// Resume point known to be safe
#[derive(Debug, Clone, Default)]
struct Checkpoint {
    cursor: Option<PersonId>,
    stats: RunStats,
    failures: usize,
}

/// Mutable invocation state
struct Run {
    id: String,
    started: Instant,
    deadline: Instant,
    phases: PhaseTracker,
    scanner: RecordScanner,
    stats: RunStats,
    failures: Vec<RecordFailure>,
    checkpoint: Checkpoint,
}

impl ContinuationController {
    /// # Errors
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(config: ReconcilerConfig, deps: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, deps })
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one invocation.
    ///
    /// # Errors
    /// Returns [`AbortedInvocation`] on an invalid token or a store failure
    /// while scanning or writing. Per-record and delivery failures never
    /// abort; they are counted in the report.
    #[instrument(name = "invoke", skip_all, fields(invocation_id = tracing::field::Empty, invocation = tracing::field::Empty))]
    pub async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationReport, AbortedInvocation> {
        let started = Instant::now();
        let id = Ulid::new().to_string();
        Span::current().record("invocation_id", id.as_str());

        let supplied = request
            .pagination_token
            .as_deref()
            .filter(|token| !token.trim().is_empty());
        let start = match supplied.map(ContinuationToken::decode).transpose() {
            Ok(Some(token)) => token,
            Ok(None) => ContinuationToken::fresh(self.deps.clock.now()),
            Err(err) => {
                warn!(error = %err, "rejecting continuation token");
                return Err(rejected_token(id, started, err.into()));
            }
        };
        Span::current().record("invocation", start.invocation);
        info!(cursor = ?start.cursor, pass_started_at = %start.pass_started_at, "invocation started");

        let mut run = Run {
            id,
            started,
            deadline: started + self.config.time_budget,
            phases: PhaseTracker::default(),
            scanner: RecordScanner::resume(Arc::clone(&self.deps.people), start.cursor.clone()),
            stats: RunStats::default(),
            failures: Vec::new(),
            checkpoint: Checkpoint {
                cursor: start.cursor.clone(),
                ..Checkpoint::default()
            },
        };
        let pipeline = self.pipeline();
        let page_size = request
            .page_size
            .filter(|size| *size > 0)
            .unwrap_or(self.config.page_size);

        if let Err(error) = self.drive(&mut run, &pipeline, page_size).await {
            return Err(abort(run, &start, error));
        }
        self.conclude(run, &start, request.page_size).await
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline {
            resolver: FactResolver::new(
                Arc::clone(&self.deps.source),
                FactCache::new(self.config.fact_cache_capacity),
                RetryPolicy::from(&self.config.source),
            ),
            detector: ChangeDetector,
            persister: BatchPersister::new(
                Arc::clone(&self.deps.people),
                self.config.write_batch_size,
            ),
            dispatcher: NotificationDispatcher::new(
                Arc::clone(&self.deps.targets),
                Arc::clone(&self.deps.publisher),
                Arc::clone(&self.deps.clock),
                self.config.notification_topic.clone(),
                self.config.delivery_concurrency,
            ),
            today: self.deps.clock.today(),
        }
    }

    /// Page loop; returns once the budget is spent or the scan is exhausted
    async fn drive(
        &self,
        run: &mut Run,
        pipeline: &Pipeline,
        page_size: usize,
    ) -> Result<(), ReconcileError> {
        let max_records = u64::try_from(self.config.max_records_per_invocation).unwrap_or(u64::MAX);

        loop {
            let remaining = max_records.saturating_sub(run.stats.processed);
            if remaining == 0 || !run.scanner.has_more() {
                return Ok(());
            }
            if Instant::now() >= run.deadline {
                info!("time budget spent before next page");
                return Ok(());
            }

            run.phases.advance(Phase::Scanning)?;
            run.checkpoint = Checkpoint {
                cursor: run.scanner.position().cloned(),
                stats: run.stats,
                failures: run.failures.len(),
            };
            let limit = usize::try_from(remaining).map_or(page_size, |r| r.min(page_size));
            let batch = run
                .scanner
                .next_page(limit)
                .await
                .map_err(ReconcileError::Scan)?;
            if batch.records.is_empty() {
                continue;
            }

            run.phases.advance(Phase::Resolving)?;
            let fetched = batch.records.len();
            let attempts = self.resolve_page(pipeline, batch.records, run.deadline).await;
            let attempted = attempts.len();

            let mut changes = Vec::new();
            for (record, result) in attempts {
                run.scanner.advance(&record.id);
                run.stats.processed += 1;
                match result {
                    Ok(Detection { outcome, next }) if outcome.requires_write() => {
                        changes.push(PendingChange {
                            prior: record,
                            next,
                            outcome,
                        });
                    }
                    Ok(_) => {}
                    Err(failure) => {
                        run.stats.failed += 1;
                        run.failures.push(failure);
                    }
                }
            }

            run.phases.advance(Phase::Persisting)?;
            let summary = match pipeline.persister.persist(changes).await {
                Ok(summary) => summary,
                Err(PersistFailure { error, partial }) => {
                    // Committed deaths drop out of the scan; announce them now
                    // or never.
                    let delivered =
                        announce_deaths(&mut run.phases, pipeline, &partial.committed).await?;
                    run.checkpoint.stats.updated += partial.committed.len() as u64;
                    run.checkpoint.stats.notified += delivered;
                    return Err(ReconcileError::Persistence(error));
                }
            };
            run.stats.updated += summary.committed.len() as u64;
            run.stats.skipped += summary.conflicts.len() as u64;
            for (person_id, detail) in summary.failures {
                run.stats.failed += 1;
                run.failures.push(RecordFailure {
                    person_id,
                    reason: FailureReason::WriteFailed,
                    detail,
                });
            }
            run.stats.notified +=
                announce_deaths(&mut run.phases, pipeline, &summary.committed).await?;

            run.scanner.finish_page(attempted == fetched);
            if attempted < fetched {
                info!(attempted, fetched, "time budget spent mid-page");
                return Ok(());
            }
        }
    }

    /// Resolve and classify records in scan order. Records not started before
    /// the deadline are left out; the result is always a prefix of `records`.
    async fn resolve_page(
        &self,
        pipeline: &Pipeline,
        records: Vec<PersonRecord>,
        deadline: Instant,
    ) -> Vec<(PersonRecord, Result<Detection, RecordFailure>)> {
        stream::iter(records)
            .map(|record| async move {
                if Instant::now() >= deadline {
                    return None;
                }
                let result = classify(pipeline, &record).await;
                Some((record, result))
            })
            .buffered(self.config.resolve_concurrency)
            .take_while(|attempt| future::ready(attempt.is_some()))
            .filter_map(future::ready)
            .collect()
            .await
    }

    async fn conclude(
        &self,
        mut run: Run,
        start: &ContinuationToken,
        page_size: Option<usize>,
    ) -> Result<InvocationReport, AbortedInvocation> {
        if let Err(error) = run.phases.advance(Phase::Deciding) {
            return Err(abort(run, start, error));
        }

        let has_more = run.scanner.has_more();
        let mut totals = start.totals;
        totals += run.stats;

        let pagination_token = if has_more {
            let next = start.successor(run.scanner.position().cloned(), totals);
            match next.encode() {
                Ok(token) => Some(token),
                Err(err) => return Err(abort(run, start, err.into())),
            }
        } else {
            None
        };

        let mut chained = false;
        if let Some(token) = pagination_token.as_ref() {
            if self.config.auto_chain && start.invocation < self.config.max_chained_invocations {
                let next = NextInvocation {
                    pagination_token: token.clone(),
                    page_size,
                    invocation: start.invocation + 1,
                };
                match self.deps.scheduler.schedule(next).await {
                    Ok(()) => chained = true,
                    Err(err) => warn!(error = %err, "could not schedule next invocation"),
                }
            } else if self.config.auto_chain {
                warn!(
                    ceiling = self.config.max_chained_invocations,
                    "chained invocation ceiling reached; resume manually with the pagination token"
                );
            }
        }

        let status = if chained {
            InvocationStatus::Chained
        } else {
            InvocationStatus::Done
        };
        let terminal = if chained { Phase::Chaining } else { Phase::Done };
        if let Err(error) = run.phases.advance(terminal) {
            return Err(abort(run, start, error));
        }

        let report = build_report(&run, start, totals, has_more, pagination_token, chained, status);
        info!(
            processed = report.processed,
            updated = report.updated,
            failed = report.failed,
            notified = report.notified,
            skipped = report.skipped,
            has_more = report.has_more_records,
            chained,
            duration_ms = report.duration_ms,
            "invocation finished"
        );
        Ok(report)
    }
}

async fn classify(
    pipeline: &Pipeline,
    record: &PersonRecord,
) -> Result<Detection, RecordFailure> {
    if let Err(err) = record.validate() {
        warn!(person = %record.id, error = %err, "skipping invalid record");
        return Err(RecordFailure {
            person_id: record.id.clone(),
            reason: FailureReason::InvalidRecord,
            detail: err.to_string(),
        });
    }
    match pipeline.resolver.resolve(record).await {
        Ok(facts) => Ok(pipeline.detector.detect(record, &facts, pipeline.today)),
        Err(err) => {
            warn!(person = %record.id, name = %record.name, error = %err, "could not resolve facts");
            Err(RecordFailure {
                person_id: record.id.clone(),
                reason: err.reason(),
                detail: err.to_string(),
            })
        }
    }
}

/// Alert subscribers for every committed death; returns deliveries
async fn announce_deaths(
    phases: &mut PhaseTracker,
    pipeline: &Pipeline,
    committed: &[PendingChange],
) -> Result<u64, ReconcileError> {
    let deaths: Vec<(&PersonRecord, NaiveDate)> = committed
        .iter()
        .filter_map(|change| match change.outcome {
            ReconciliationOutcome::Died { date } => Some((&change.next, date)),
            _ => None,
        })
        .collect();
    if deaths.is_empty() {
        return Ok(0);
    }

    phases.advance(Phase::Notifying)?;
    let mut delivered = 0;
    for (person, date) in deaths {
        info!(person = %person.id, name = %person.name, %date, "death recorded");
        let report = pipeline.dispatcher.notify_death(person, date).await;
        delivered += report.delivered as u64;
    }
    Ok(delivered)
}

fn abort(mut run: Run, start: &ContinuationToken, error: ReconcileError) -> AbortedInvocation {
    if let Err(err) = run.phases.advance(Phase::Aborted) {
        warn!(error = %err, "abort raised from a terminal phase");
    }
    run.failures.truncate(run.checkpoint.failures);
    let mut totals = start.totals;
    totals += run.checkpoint.stats;
    let pagination_token = start
        .successor(run.checkpoint.cursor.clone(), totals)
        .encode()
        .ok();
    warn!(error = %error, resume_from = ?run.checkpoint.cursor, "invocation aborted");

    let mut report = build_report(
        &run,
        start,
        totals,
        pagination_token.is_some(),
        pagination_token,
        false,
        InvocationStatus::Aborted,
    );
    let safe = run.checkpoint.stats;
    report.processed = safe.processed;
    report.updated = safe.updated;
    report.failed = safe.failed;
    report.notified = safe.notified;
    report.skipped = safe.skipped;
    AbortedInvocation {
        error,
        report: Box::new(report),
    }
}

fn rejected_token(id: String, started: Instant, error: ReconcileError) -> AbortedInvocation {
    AbortedInvocation {
        error,
        report: Box::new(InvocationReport {
            invocation_id: id,
            invocation: 0,
            processed: 0,
            updated: 0,
            failed: 0,
            notified: 0,
            skipped: 0,
            duration_ms: elapsed_ms(started),
            has_more_records: false,
            pagination_token: None,
            chained: false,
            status: InvocationStatus::Aborted,
            totals: RunStats::default(),
            failures: Vec::new(),
        }),
    }
}

fn build_report(
    run: &Run,
    start: &ContinuationToken,
    totals: RunStats,
    has_more: bool,
    pagination_token: Option<String>,
    chained: bool,
    status: InvocationStatus,
) -> InvocationReport {
    InvocationReport {
        invocation_id: run.id.clone(),
        invocation: start.invocation,
        processed: run.stats.processed,
        updated: run.stats.updated,
        failed: run.stats.failed,
        notified: run.stats.notified,
        skipped: run.stats.skipped,
        duration_ms: elapsed_ms(run.started),
        has_more_records: has_more,
        pagination_token,
        chained,
        status,
        totals,
        failures: run.failures.clone(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
