//! Death notification dispatch
//!
//! Fans a death out to every eligible subscriber: verified, opted in, and
//! with a phone number that normalizes to E.164. Recipients are deduplicated
//! by normalized number, each (number, person, date) is sent at most once per
//! dispatcher, and delivery failures are logged and counted without stopping
//! the invocation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};
use vigil_model::{NotificationCategory, PersonId, PersonRecord, PhoneNumber, UserId};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::publish::{OutboundMessage, SmsPublisher, SmsType};
use crate::store::TargetStore;

/// Single-segment SMS length
pub const MAX_MESSAGE_CHARS: usize = 160;

const ELLIPSIS: &str = "...";

/// Compose the alert text, truncating the name so the whole message fits
/// in one segment.
#[must_use]
pub fn compose_message(name: &str, date: NaiveDate) -> String {
    let suffix = format!(
        " has passed away on {}. Check the game for updates!",
        date.format("%Y-%m-%d")
    );
    let name = name.trim();
    let budget = MAX_MESSAGE_CHARS.saturating_sub(suffix.chars().count());
    if name.chars().count() <= budget {
        return format!("{name}{suffix}");
    }
    let keep = budget.saturating_sub(ELLIPSIS.len());
    let truncated: String = name.chars().take(keep).collect();
    format!("{}{ELLIPSIS}{suffix}", truncated.trim_end())
}

/// Outcome of one death fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Distinct eligible recipients
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Already sent for this person and date
    pub suppressed: usize,
    /// No topic configured; nothing attempted
    pub disabled: bool,
}

#[derive(Debug, Clone)]
struct Recipient {
    user_id: UserId,
    phone: PhoneNumber,
}

/// Per-invocation notification dispatcher
pub struct NotificationDispatcher {
    targets: Arc<dyn TargetStore>,
    publisher: Arc<dyn SmsPublisher>,
    clock: Arc<dyn Clock>,
    topic: Option<String>,
    concurrency: usize,
    recipients: OnceCell<Vec<Recipient>>,
    sent: Mutex<HashSet<(PhoneNumber, PersonId, NaiveDate)>>,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(
        targets: Arc<dyn TargetStore>,
        publisher: Arc<dyn SmsPublisher>,
        clock: Arc<dyn Clock>,
        topic: Option<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            targets,
            publisher,
            clock,
            topic,
            concurrency: concurrency.max(1),
            recipients: OnceCell::new(),
            sent: Mutex::new(HashSet::new()),
        }
    }

    /// Notify every eligible subscriber that `person` died on `date`.
    ///
    /// Never fails: target lookup and delivery errors are logged and counted.
    #[instrument(skip(self, person), fields(person = %person.id))]
    pub async fn notify_death(&self, person: &PersonRecord, date: NaiveDate) -> DispatchReport {
        let Some(topic) = self.topic.as_deref() else {
            info!("notification topic not configured; skipping death alert");
            return DispatchReport {
                disabled: true,
                ..DispatchReport::default()
            };
        };

        let recipients = match self.recipients().await {
            Ok(recipients) => recipients,
            Err(err) => {
                error!(error = %err, "could not list notification targets; alert not sent");
                return DispatchReport {
                    failed: 1,
                    ..DispatchReport::default()
                };
            }
        };

        let fresh: Vec<&Recipient> = {
            let mut sent = self.sent.lock();
            recipients
                .iter()
                .filter(|r| sent.insert((r.phone.clone(), person.id.clone(), date)))
                .collect()
        };
        let mut report = DispatchReport {
            recipients: recipients.len(),
            suppressed: recipients.len() - fresh.len(),
            ..DispatchReport::default()
        };

        let body = compose_message(&person.name, date);
        let results: Vec<_> = stream::iter(fresh)
            .map(|recipient| {
                let message = OutboundMessage {
                    topic: topic.to_string(),
                    phone_number: recipient.phone.clone(),
                    body: body.clone(),
                    sms_type: SmsType::Transactional,
                };
                async move { (recipient, self.publisher.publish(&message).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let now = self.clock.now();
        for (recipient, result) in results {
            match result {
                Ok(message_id) => {
                    report.delivered += 1;
                    debug!(user = %recipient.user_id, %message_id, "alert delivered");
                    if let Err(err) = self.targets.mark_notified(&recipient.user_id, now).await {
                        warn!(user = %recipient.user_id, error = %err, "could not stamp last notification");
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        user = %recipient.user_id,
                        to = %recipient.phone.masked(),
                        error = %err,
                        "alert delivery failed"
                    );
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            suppressed = report.suppressed,
            "death alert dispatched"
        );
        report
    }

    /// Eligible recipients, loaded once and deduplicated by normalized phone
    async fn recipients(&self) -> Result<&Vec<Recipient>, StoreError> {
        self.recipients
            .get_or_try_init(|| async {
                let targets = self.targets.list_targets().await?;
                let mut seen = HashSet::new();
                let mut recipients = Vec::new();
                for target in targets {
                    match target.eligible_phone(NotificationCategory::DeathAlert) {
                        Ok(phone) if seen.insert(phone.clone()) => recipients.push(Recipient {
                            user_id: target.user_id,
                            phone,
                        }),
                        Ok(phone) => {
                            debug!(user = %target.user_id, to = %phone.masked(), "duplicate phone number");
                        }
                        Err(reason) => debug!(user = %target.user_id, %reason, "target not eligible"),
                    }
                }
                debug!(eligible = recipients.len(), "notification targets loaded");
                Ok(recipients)
            })
            .await
    }
}
