//! External fact source collaborator

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Biographical facts as reported by the external source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFacts {
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub death_date: Option<NaiveDate>,
    /// Canonical page reference, when the source reports one
    #[serde(default)]
    pub canonical_page: Option<String>,
}

/// The external knowledge source.
///
/// `Ok(None)` means the source authoritatively has no entry. Implementations
/// report transport trouble as a transient [`SourceError`]; the resolver owns
/// retries, timeouts and caching.
#[async_trait]
pub trait FactSource: Send + Sync {
    /// Map a page reference to the source's stable identifier
    async fn lookup_identifier(&self, page: &str) -> Result<Option<String>, SourceError>;

    /// Fetch the facts for a stable identifier
    async fn fetch_facts(&self, external_id: &str) -> Result<Option<SourceFacts>, SourceError>;
}
