//! Testing utilities for the Vigil workspace
//!
//! Fixtures, fault-injecting collaborators and a wired-up harness.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use vigil_core::memory::{MemoryPersonStore, MemoryTargetStore};
use vigil_core::{
    AbortedInvocation, ChannelScheduler, Collaborators, ConditionalWrite, ContinuationController,
    DeliveryError, FactSource, FixedClock, InvocationReport, InvocationRequest, NextInvocation,
    OutboundMessage, PersonStore, ReconcilerConfig, ScanPage, SmsPublisher, SourceError,
    SourceFacts, StoreError, WriteStatus,
};
use vigil_model::{NotificationCategory, NotificationTarget, PersonId, PersonRecord};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Date the harness clock reports
pub fn today() -> NaiveDate {
    date(2024, 7, 20)
}

/// Record with a known external id `Q-<id>`
pub fn tracked(id: &str) -> PersonRecord {
    PersonRecord::new(id, format!("Person {id}")).with_external_id(format!("Q-{id}"))
}

/// Verified, opted-in subscriber
pub fn subscriber(user: &str, phone: &str) -> NotificationTarget {
    NotificationTarget::new(user, phone)
        .verified()
        .opted_in(NotificationCategory::DeathAlert)
}

pub fn alive(birth: NaiveDate) -> SourceFacts {
    SourceFacts {
        birth_date: Some(birth),
        ..SourceFacts::default()
    }
}

pub fn dead(birth: NaiveDate, death: NaiveDate) -> SourceFacts {
    SourceFacts {
        birth_date: Some(birth),
        death_date: Some(death),
        canonical_page: None,
    }
}

/// One scripted answer
#[derive(Debug, Clone)]
pub enum Reply {
    Facts(SourceFacts),
    Missing,
    Fail(SourceError),
    /// Answer after a delay
    Slow(Duration, SourceFacts),
}

/// Fact source answering from per-identifier scripts.
///
/// Each call pops the next scripted reply; the last reply repeats once the
/// script runs out. Unscripted identifiers are missing. Page lookups answer
/// from a fixed index.
#[derive(Debug, Default)]
pub struct ScriptedFactSource {
    pages: HashMap<String, String>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fetches: Mutex<HashMap<String, u32>>,
    lookups: AtomicU64,
}

impl ScriptedFactSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn page(mut self, page: &str, external_id: &str) -> Self {
        self.pages.insert(page.to_string(), external_id.to_string());
        self
    }

    #[must_use]
    pub fn script(self, external_id: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts
            .lock()
            .insert(external_id.to_string(), replies.into_iter().collect());
        self
    }

    #[must_use]
    pub fn facts(self, external_id: &str, facts: SourceFacts) -> Self {
        self.script(external_id, [Reply::Facts(facts)])
    }

    /// Fact fetches served for `external_id`
    pub fn fetches(&self, external_id: &str) -> u32 {
        self.fetches.lock().get(external_id).copied().unwrap_or(0)
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    fn next_reply(&self, external_id: &str) -> Reply {
        *self
            .fetches
            .lock()
            .entry(external_id.to_string())
            .or_default() += 1;
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(external_id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(Reply::Missing),
            Some(script) => script.front().cloned().unwrap_or(Reply::Missing),
            None => Reply::Missing,
        }
    }
}

#[async_trait]
impl FactSource for ScriptedFactSource {
    async fn lookup_identifier(&self, page: &str) -> Result<Option<String>, SourceError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.pages.get(page).cloned())
    }

    async fn fetch_facts(&self, external_id: &str) -> Result<Option<SourceFacts>, SourceError> {
        match self.next_reply(external_id) {
            Reply::Facts(facts) => Ok(Some(facts)),
            Reply::Missing => Ok(None),
            Reply::Fail(err) => Err(err),
            Reply::Slow(delay, facts) => {
                tokio::time::sleep(delay).await;
                Ok(Some(facts))
            }
        }
    }
}

/// Person store wrapper with fault injection
pub struct FaultyPersonStore {
    pub inner: Arc<MemoryPersonStore>,
    scans: AtomicU32,
    writes: AtomicU32,
    fail_scan_at: Option<u32>,
    fail_write_at: Option<u32>,
    /// Records rewritten behind the engine's back just before each batch
    interfere: Mutex<Vec<PersonRecord>>,
}

impl FaultyPersonStore {
    pub fn new(inner: Arc<MemoryPersonStore>) -> Self {
        Self {
            inner,
            scans: AtomicU32::new(0),
            writes: AtomicU32::new(0),
            fail_scan_at: None,
            fail_write_at: None,
            interfere: Mutex::new(Vec::new()),
        }
    }

    /// Fail the nth scan call (zero-based)
    #[must_use]
    pub fn fail_scan_at(mut self, call: u32) -> Self {
        self.fail_scan_at = Some(call);
        self
    }

    /// Fail the nth write batch (zero-based)
    #[must_use]
    pub fn fail_write_at(mut self, call: u32) -> Self {
        self.fail_write_at = Some(call);
        self
    }

    /// Replace `record` in the store right before the next write batch
    pub fn interfere_with(&self, record: PersonRecord) {
        self.interfere.lock().push(record);
    }
}

#[async_trait]
impl PersonStore for FaultyPersonStore {
    async fn scan_unresolved(
        &self,
        start_after: Option<&PersonId>,
        limit: usize,
    ) -> Result<ScanPage, StoreError> {
        let call = self.scans.fetch_add(1, Ordering::Relaxed);
        if self.fail_scan_at == Some(call) {
            return Err(StoreError::Unavailable("scan timed out".into()));
        }
        self.inner.scan_unresolved(start_after, limit).await
    }

    async fn write_batch(
        &self,
        writes: Vec<ConditionalWrite>,
    ) -> Result<Vec<WriteStatus>, StoreError> {
        let call = self.writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_write_at == Some(call) {
            return Err(StoreError::Throttled("write capacity exceeded".into()));
        }
        let concurrent: Vec<PersonRecord> = self.interfere.lock().drain(..).collect();
        for record in concurrent {
            self.inner.insert(record);
        }
        self.inner.write_batch(writes).await
    }
}

/// Publisher that records deliveries and fails for chosen numbers
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: HashSet<String>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_for(mut self, phone: &str) -> Self {
        self.failing.insert(phone.to_string());
        self
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Normalized numbers messaged so far
    pub fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|m| m.phone_number.as_str().to_string())
            .collect()
    }
}

#[async_trait]
impl SmsPublisher for RecordingPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<String, DeliveryError> {
        if self.failing.contains(message.phone_number.as_str()) {
            return Err(DeliveryError::Rejected("opted out at carrier".into()));
        }
        let mut sent = self.sent.lock();
        sent.push(message.clone());
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Controller wired to in-memory collaborators
pub struct Harness {
    pub controller: ContinuationController,
    pub people: Arc<MemoryPersonStore>,
    pub targets: Arc<MemoryTargetStore>,
    pub source: Arc<ScriptedFactSource>,
    pub publisher: Arc<RecordingPublisher>,
    pub chained: UnboundedReceiver<NextInvocation>,
}

/// Builder for [`Harness`]
pub struct HarnessBuilder {
    config: ReconcilerConfig,
    records: Vec<PersonRecord>,
    targets: Vec<NotificationTarget>,
    source: ScriptedFactSource,
    publisher: RecordingPublisher,
    store: Option<Arc<dyn PersonStore>>,
    people: Option<Arc<MemoryPersonStore>>,
    now: DateTime<Utc>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            config: ReconcilerConfig::default().with_topic("arn:test:deaths"),
            records: Vec::new(),
            targets: Vec::new(),
            source: ScriptedFactSource::new(),
            publisher: RecordingPublisher::new(),
            store: None,
            people: None,
            now: today().and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }
}

impl HarnessBuilder {
    #[must_use]
    pub fn config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn records(mut self, records: impl IntoIterator<Item = PersonRecord>) -> Self {
        self.records.extend(records);
        self
    }

    #[must_use]
    pub fn targets(mut self, targets: impl IntoIterator<Item = NotificationTarget>) -> Self {
        self.targets.extend(targets);
        self
    }

    #[must_use]
    pub fn source(mut self, source: ScriptedFactSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn publisher(mut self, publisher: RecordingPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Route person-table traffic through a wrapper around the harness store.
    /// Records must be added before wrapping.
    #[must_use]
    pub fn wrap_store<F, S>(mut self, wrap: F) -> (Self, Arc<S>)
    where
        F: FnOnce(Arc<MemoryPersonStore>) -> S,
        S: PersonStore + 'static,
    {
        let inner = Arc::new(MemoryPersonStore::with_records(self.records.drain(..)));
        let wrapped = Arc::new(wrap(inner.clone()));
        self.people = Some(inner);
        self.store = Some(wrapped.clone());
        (self, wrapped)
    }

    pub fn build(self) -> Harness {
        let people = self
            .people
            .unwrap_or_else(|| Arc::new(MemoryPersonStore::with_records(self.records)));
        let targets = Arc::new(MemoryTargetStore::with_targets(self.targets));
        let source = Arc::new(self.source);
        let publisher = Arc::new(self.publisher);
        let (scheduler, chained) = ChannelScheduler::new();

        let store: Arc<dyn PersonStore> = match self.store {
            Some(store) => store,
            None => people.clone(),
        };
        let deps = Collaborators {
            people: store,
            targets: targets.clone(),
            source: source.clone(),
            publisher: publisher.clone(),
            scheduler: Arc::new(scheduler),
            clock: Arc::new(FixedClock::new(self.now)),
        };

        Harness {
            controller: ContinuationController::new(self.config, deps).unwrap(),
            people,
            targets,
            source,
            publisher,
            chained,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub async fn invoke(&self, token: Option<String>) -> Result<InvocationReport, AbortedInvocation> {
        self.controller
            .invoke(InvocationRequest {
                pagination_token: token,
                page_size: None,
            })
            .await
    }

    /// Run invocations until the pass completes, following chained
    /// invocations when they are scheduled and the returned token otherwise.
    /// Panics if the pass does not finish within `max_invocations`.
    pub async fn drain(&mut self, max_invocations: usize) -> Vec<InvocationReport> {
        let mut reports = Vec::new();
        let mut request = InvocationRequest::default();
        for _ in 0..max_invocations {
            let report = self.controller.invoke(request).await.unwrap();
            let more = report.has_more_records;
            let token = report.pagination_token.clone();
            reports.push(report);
            if !more {
                return reports;
            }
            request = match self.chained.try_recv() {
                Ok(next) => next.into_request(),
                Err(_) => InvocationRequest {
                    pagination_token: token,
                    page_size: None,
                },
            };
        }
        panic!("pass did not finish within {max_invocations} invocations");
    }

    /// Stored record by key
    pub fn record(&self, id: &str) -> PersonRecord {
        self.people.get(&PersonId::new(id)).unwrap()
    }
}
