//! Change detection
//!
//! Compares a stored record with freshly resolved facts and classifies the
//! result. Facts the source omits never clear stored values, and a recorded
//! death is terminal.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use vigil_model::{age_at, PersonRecord};

use crate::resolver::ResolvedFacts;

/// Fact fields whose change makes a record worth rewriting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    BirthDate,
    Age,
    ExternalId,
    ExternalPage,
}

/// Classification of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Unchanged,
    /// Empty `fields` means only the stored fingerprint was missing or stale
    Updated { fields: Vec<TrackedField> },
    Died { date: NaiveDate },
}

impl ReconciliationOutcome {
    #[inline]
    #[must_use]
    pub fn requires_write(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Detector output: the classification and the record to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub outcome: ReconciliationOutcome,
    /// Sealed successor record; equal to the prior record when unchanged
    pub next: PersonRecord,
}

/// Pure change classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    /// Classify `facts` against `prior` as of `today`
    #[must_use]
    pub fn detect(&self, prior: &PersonRecord, facts: &ResolvedFacts, today: NaiveDate) -> Detection {
        if prior.is_deceased() {
            return unchanged(prior);
        }

        let mut next = prior.clone();
        next.birth_date = facts.birth_date.or(prior.birth_date);
        next.death_date = facts.death_date;
        next.external_id = Some(facts.external_id.clone());
        next.external_page = facts.external_page.clone().or_else(|| prior.external_page.clone());
        next.age = next
            .birth_date
            .map(|birth| age_at(birth, next.death_date, today))
            .or(prior.age);
        next.fingerprint = Some(next.compute_fingerprint());

        if let Some(date) = next.death_date {
            return Detection {
                outcome: ReconciliationOutcome::Died { date },
                next,
            };
        }

        let fields = changed_fields(prior, &next);
        if fields.is_empty() && prior.fingerprint == next.fingerprint {
            return unchanged(prior);
        }
        Detection {
            outcome: ReconciliationOutcome::Updated { fields },
            next,
        }
    }
}

fn unchanged(prior: &PersonRecord) -> Detection {
    Detection {
        outcome: ReconciliationOutcome::Unchanged,
        next: prior.clone(),
    }
}

fn changed_fields(prior: &PersonRecord, next: &PersonRecord) -> Vec<TrackedField> {
    let mut fields = Vec::new();
    if prior.birth_date != next.birth_date {
        fields.push(TrackedField::BirthDate);
    }
    if prior.age != next.age {
        fields.push(TrackedField::Age);
    }
    if prior.external_id != next.external_id {
        fields.push(TrackedField::ExternalId);
    }
    if prior.external_page != next.external_page {
        fields.push(TrackedField::ExternalPage);
    }
    fields
}
