//! Outbound SMS publishing

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vigil_model::PhoneNumber;

use crate::error::DeliveryError;

/// SMS delivery class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmsType {
    /// Highest-reliability routing
    #[default]
    Transactional,
    Promotional,
}

/// A message ready for the publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub phone_number: PhoneNumber,
    pub body: String,
    pub sms_type: SmsType,
}

/// Message publisher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsPublisher: Send + Sync {
    /// Publish one message, returning the publisher's message id
    async fn publish(&self, message: &OutboundMessage) -> Result<String, DeliveryError>;
}
