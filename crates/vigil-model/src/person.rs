//! Person records
//!
//! The store item for one tracked person. Fact fields are optional and typed;
//! the record is only ever mutated through a reconciliation pass and never
//! deleted by it.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fingerprint::{FactFields, Fingerprint};

/// Unique person key. Scan order is the lexical order of this key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub String);

impl PersonId {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A tracked person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PersonRecord {
    /// Store key
    pub id: PersonId,
    /// Display name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    /// Once set, never cleared by reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    /// Identifier in the external knowledge source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Page reference in the external knowledge source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_page: Option<String>,
    /// Digest over the fact fields as last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl PersonRecord {
    /// Create a record with only a key and name
    #[must_use]
    pub fn new(id: impl Into<PersonId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            birth_date: None,
            death_date: None,
            age: None,
            external_id: None,
            external_page: None,
            fingerprint: None,
        }
    }

    #[must_use]
    pub fn with_page(mut self, page: impl Into<String>) -> Self {
        self.external_page = Some(page.into());
        self
    }

    #[must_use]
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_birth_date(mut self, date: NaiveDate) -> Self {
        self.birth_date = Some(date);
        self
    }

    #[must_use]
    pub fn with_death_date(mut self, date: NaiveDate) -> Self {
        self.death_date = Some(date);
        self
    }

    #[must_use]
    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    /// Stamp the record with the fingerprint of its current fact fields
    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.fingerprint = Some(self.compute_fingerprint());
        self
    }

    /// Borrowed view of the fingerprinted fields
    #[must_use]
    pub fn facts(&self) -> FactFields<'_> {
        FactFields {
            birth_date: self.birth_date,
            death_date: self.death_date,
            age: self.age,
            external_id: self.external_id.as_deref(),
            external_page: self.external_page.as_deref(),
        }
    }

    /// Fingerprint of the current fact fields (not the stored one)
    #[inline]
    #[must_use]
    pub fn compute_fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.facts())
    }

    /// Whether a death has been recorded
    #[inline]
    #[must_use]
    pub fn is_deceased(&self) -> bool {
        self.death_date.is_some()
    }

    /// Check structural invariants of a record read from the store.
    ///
    /// # Errors
    /// Returns [`RecordError`] for an empty key or a death before birth.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.id.0.trim().is_empty() {
            return Err(RecordError::EmptyId);
        }
        if let (Some(birth), Some(death)) = (self.birth_date, self.death_date) {
            if death < birth {
                return Err(RecordError::DeathBeforeBirth {
                    id: self.id.clone(),
                    birth,
                    death,
                });
            }
        }
        Ok(())
    }
}

/// Invalid person record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("person record has an empty id")]
    EmptyId,

    #[error("person {id}: death date {death} precedes birth date {birth}")]
    DeathBeforeBirth {
        id: PersonId,
        birth: NaiveDate,
        death: NaiveDate,
    },
}
