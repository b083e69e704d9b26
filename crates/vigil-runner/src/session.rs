//! Controller wired to fixture-backed collaborators

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use vigil_core::memory::{MemoryPersonStore, MemoryPublisher, MemoryTargetStore, StaticFactSource};
use vigil_core::{
    AbortedInvocation, ChannelScheduler, Collaborators, ContinuationController, InvocationReport,
    InvocationRequest, NextInvocation, OutboundMessage, ReconcilerConfig, SystemClock,
};

use crate::fixtures::Fixtures;

/// How a drained pass ended
#[derive(Debug)]
pub struct DrainOutcome {
    pub reports: Vec<InvocationReport>,
    /// Set when work remains but nothing was chained, either because the
    /// chain ceiling was hit or `max_invocations` ran out
    pub resume_token: Option<String>,
}

/// One loaded fixture set and the controller running over it
pub struct Session {
    controller: ContinuationController,
    people: Arc<MemoryPersonStore>,
    targets: Arc<MemoryTargetStore>,
    publisher: Arc<MemoryPublisher>,
    chained: UnboundedReceiver<NextInvocation>,
    fixtures: Fixtures,
}

impl Session {
    pub fn open(fixtures: Fixtures, config: ReconcilerConfig) -> Result<Self> {
        let people = Arc::new(MemoryPersonStore::with_records(fixtures.persons.clone()));
        let targets = Arc::new(MemoryTargetStore::with_targets(fixtures.targets.clone()));
        let source = Arc::new(StaticFactSource::new(
            fixtures.pages.clone(),
            fixtures.facts.clone(),
        ));
        let publisher = Arc::new(MemoryPublisher::default());
        let (scheduler, chained) = ChannelScheduler::new();

        let controller = ContinuationController::new(
            config,
            Collaborators {
                people: people.clone(),
                targets: targets.clone(),
                source,
                publisher: publisher.clone(),
                scheduler: Arc::new(scheduler),
                clock: Arc::new(SystemClock),
            },
        )?;

        Ok(Self {
            controller,
            people,
            targets,
            publisher,
            chained,
            fixtures,
        })
    }

    /// Run a single invocation. A chained follow-up, if scheduled, stays
    /// queued and is dropped with the session.
    pub async fn invoke(
        &self,
        token: Option<String>,
        page_size: Option<usize>,
    ) -> Result<InvocationReport, AbortedInvocation> {
        self.controller
            .invoke(InvocationRequest {
                pagination_token: token,
                page_size,
            })
            .await
    }

    /// Follow chained invocations until the pass ends, the chain stops, or
    /// `max_invocations` have run.
    pub async fn drain(
        &mut self,
        request: InvocationRequest,
        max_invocations: usize,
        delay: Duration,
    ) -> Result<DrainOutcome, AbortedInvocation> {
        let mut reports = Vec::new();
        let mut request = request;
        for _ in 0..max_invocations {
            let report = self.controller.invoke(request).await?;
            let token = report.pagination_token.clone();
            let more = report.has_more_records;
            reports.push(report);
            if !more {
                return Ok(DrainOutcome {
                    reports,
                    resume_token: None,
                });
            }
            match self.chained.try_recv() {
                Ok(next) => {
                    info!(invocation = next.invocation, "following chained invocation");
                    request = next.into_request();
                }
                Err(_) => {
                    warn!("work remains but no invocation was chained");
                    return Ok(DrainOutcome {
                        reports,
                        resume_token: token,
                    });
                }
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        let resume_token = reports.last().and_then(|r| r.pagination_token.clone());
        Ok(DrainOutcome {
            reports,
            resume_token,
        })
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.publisher.sent()
    }

    /// Current table contents, for writing back to the fixture file
    pub fn snapshot(&self) -> Fixtures {
        Fixtures {
            persons: self.people.snapshot(),
            targets: self.targets.snapshot(),
            ..self.fixtures.clone()
        }
    }
}
