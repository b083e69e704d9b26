//! Notification targets
//!
//! Subscribers who receive an SMS when a tracked person dies. Verification and
//! opt-in state are owned by the sign-up flow; reconciliation only reads them
//! and stamps `last_notified`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phone::{PhoneError, PhoneNumber};

/// Subscriber key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of notification a subscriber can opt into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// A tracked person's death was confirmed
    DeathAlert,
}

/// A notification subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationTarget {
    pub user_id: UserId,
    /// As entered; may contain invisible formatting characters
    pub phone_number: String,
    #[serde(default)]
    pub phone_verified: bool,
    #[serde(default)]
    pub opt_ins: BTreeSet<NotificationCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notified: Option<DateTime<Utc>>,
}

impl NotificationTarget {
    #[must_use]
    pub fn new(user_id: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            phone_number: phone_number.into(),
            phone_verified: false,
            opt_ins: BTreeSet::new(),
            last_notified: None,
        }
    }

    #[must_use]
    pub fn verified(mut self) -> Self {
        self.phone_verified = true;
        self
    }

    #[must_use]
    pub fn opted_in(mut self, category: NotificationCategory) -> Self {
        self.opt_ins.insert(category);
        self
    }

    #[inline]
    #[must_use]
    pub fn is_opted_in(&self, category: NotificationCategory) -> bool {
        self.opt_ins.contains(&category)
    }

    /// Resolve the normalized number this target may be notified at.
    ///
    /// # Errors
    /// Returns the first reason the target is ineligible.
    pub fn eligible_phone(&self, category: NotificationCategory) -> Result<PhoneNumber, Ineligible> {
        if !self.phone_verified {
            return Err(Ineligible::Unverified);
        }
        if !self.is_opted_in(category) {
            return Err(Ineligible::NotOptedIn(category));
        }
        PhoneNumber::parse(&self.phone_number).map_err(Ineligible::InvalidPhone)
    }
}

/// Why a target cannot receive a notification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Ineligible {
    #[error("phone number not verified")]
    Unverified,

    #[error("not opted into {0:?}")]
    NotOptedIn(NotificationCategory),

    #[error("invalid phone number: {0}")]
    InvalidPhone(#[from] PhoneError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAT: NotificationCategory = NotificationCategory::DeathAlert;

    #[test]
    fn eligible_requires_verification_and_opt_in() {
        let base = NotificationTarget::new("u-1", "+14155550123");
        assert_eq!(base.eligible_phone(CAT), Err(Ineligible::Unverified));

        let verified = base.clone().verified();
        assert_eq!(
            verified.eligible_phone(CAT),
            Err(Ineligible::NotOptedIn(CAT))
        );

        let ready = verified.opted_in(CAT);
        assert_eq!(ready.eligible_phone(CAT).unwrap().as_str(), "+14155550123");
    }

    #[test]
    fn eligibility_ignores_invisible_characters() {
        let noisy = NotificationTarget::new("u-1", "\u{202A}+1 415\u{200B}555 0123\u{202C}")
            .verified()
            .opted_in(CAT);
        let clean = NotificationTarget::new("u-2", "+14155550123")
            .verified()
            .opted_in(CAT);
        assert_eq!(noisy.eligible_phone(CAT), clean.eligible_phone(CAT));
    }

    #[test]
    fn invalid_phone_is_ineligible() {
        let target = NotificationTarget::new("u-1", "555-0123").verified().opted_in(CAT);
        assert!(matches!(
            target.eligible_phone(CAT),
            Err(Ineligible::InvalidPhone(_))
        ));
    }

    #[test]
    fn serde_defaults_missing_flags() {
        let json = r#"{"UserId":"u-9","PhoneNumber":"+14155550123"}"#;
        let target: NotificationTarget = serde_json::from_str(json).unwrap();
        assert!(!target.phone_verified);
        assert!(target.opt_ins.is_empty());
        assert!(target.last_notified.is_none());
    }
}
