//! Chained invocation scheduling

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::controller::InvocationRequest;
use crate::error::ScheduleError;

/// Everything needed to start the next invocation of a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextInvocation {
    pub pagination_token: String,
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Counter the next invocation will run under
    pub invocation: u32,
}

impl NextInvocation {
    #[must_use]
    pub fn into_request(self) -> InvocationRequest {
        InvocationRequest {
            pagination_token: Some(self.pagination_token),
            page_size: self.page_size,
        }
    }
}

/// Enqueues the next invocation. Fire-and-forget: the caller never awaits
/// the scheduled run.
#[async_trait]
pub trait InvocationScheduler: Send + Sync {
    async fn schedule(&self, next: NextInvocation) -> Result<(), ScheduleError>;
}

/// In-process scheduler backed by an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<NextInvocation>,
}

impl ChannelScheduler {
    /// Scheduler and the receiving end a driver loop consumes
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NextInvocation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl InvocationScheduler for ChannelScheduler {
    async fn schedule(&self, next: NextInvocation) -> Result<(), ScheduleError> {
        self.tx.send(next).map_err(|_| ScheduleError::Closed)
    }
}
