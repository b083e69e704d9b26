//! JSON fixture files

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vigil_core::SourceFacts;
use vigil_model::{NotificationTarget, PersonRecord};

/// Table contents plus the facts the source will answer with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixtures {
    #[serde(default)]
    pub persons: Vec<PersonRecord>,
    #[serde(default)]
    pub targets: Vec<NotificationTarget>,
    /// Page title to external id
    #[serde(default)]
    pub pages: HashMap<String, String>,
    /// External id to facts
    #[serde(default)]
    pub facts: HashMap<String, SourceFacts>,
}

impl Fixtures {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading fixtures from {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing fixtures in {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let fixtures: Self = serde_json::from_str(raw)?;
        for person in &fixtures.persons {
            person
                .validate()
                .with_context(|| format!("person {}", person.id))?;
        }
        Ok(fixtures)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing fixtures to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "persons": [
            {"Id": "p-1", "Name": "Ada Example", "ExternalPage": "Ada_Example"},
            {"Id": "p-2", "Name": "Bo Example", "ExternalId": "Q2"}
        ],
        "targets": [
            {"UserId": "u-1", "PhoneNumber": "+14155550123", "PhoneVerified": true, "OptIns": ["death_alert"]}
        ],
        "pages": {"Ada_Example": "Q1"},
        "facts": {"Q1": {"birthDate": "1940-02-02", "deathDate": "2024-06-30"}}
    }"#;

    #[test]
    fn parses_sample() {
        let fixtures = Fixtures::parse(SAMPLE).unwrap();
        assert_eq!(fixtures.persons.len(), 2);
        assert_eq!(fixtures.targets.len(), 1);
        assert_eq!(fixtures.pages["Ada_Example"], "Q1");
        assert!(fixtures.facts["Q1"].death_date.is_some());
    }

    #[test]
    fn sections_are_optional() {
        let fixtures = Fixtures::parse("{}").unwrap();
        assert_eq!(fixtures, Fixtures::default());
    }

    #[test]
    fn rejects_invalid_people() {
        let raw = r#"{"persons": [{"Id": " ", "Name": "Nobody"}]}"#;
        assert!(Fixtures::parse(raw).is_err());
    }
}
