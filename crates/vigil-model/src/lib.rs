//! Vigil data model
//!
//! Typed store records for the reconciliation engine:
//!
//! - [`PersonRecord`]: a tracked person and their birth/death facts
//! - [`Fingerprint`]: SHA-256 digest over fact fields, used for change
//!   detection and conditional writes
//! - [`NotificationTarget`]: an SMS subscriber with verification and opt-in state
//! - [`PhoneNumber`]: E.164 normalization that strips invisible formatting
//!
//! # Example
//!
//! ```rust
//! use vigil_model::{PersonRecord, PhoneNumber};
//!
//! let record = PersonRecord::new("p-1", "Forest Whitaker").with_page("Forest_Whitaker");
//! assert!(!record.is_deceased());
//!
//! let phone = PhoneNumber::parse("+1 (415) 555-0123").unwrap();
//! assert_eq!(phone.as_str(), "+14155550123");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod age;
mod fingerprint;
mod person;
mod phone;
mod target;

pub use age::{age_at, age_between};
pub use fingerprint::{FactFields, Fingerprint, FingerprintError};
pub use person::{PersonId, PersonRecord, RecordError};
pub use phone::{PhoneError, PhoneNumber};
pub use target::{Ineligible, NotificationCategory, NotificationTarget, UserId};
