//! Vigil Runner - drives reconciliation passes locally
//!
//! Loads people, subscribers and source facts from a JSON fixture file into
//! the in-memory backends, then runs single invocations or whole chained
//! passes against them.

#![allow(missing_docs)]

pub mod fixtures;
pub mod session;
pub mod telemetry;

pub use fixtures::Fixtures;
pub use session::{DrainOutcome, Session};
