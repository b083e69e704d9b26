//! Continuation tokens
//!
//! A token is everything the next invocation of a pass needs to resume: the
//! last key whose work is done, cumulative counters, the invocation counter
//! and when the pass started. It travels as hex-encoded JSON with a SHA-256
//! checksum over the payload, so truncated or edited tokens are rejected
//! instead of silently restarting or skipping part of the table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vigil_model::PersonId;

use crate::controller::RunStats;
use crate::error::TokenError;

/// Current token format
pub const TOKEN_VERSION: u32 = 1;

const CHECKSUM_DOMAIN: &[u8] = b"vigil.token.v1";

/// Decoded continuation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationToken {
    pub version: u32,
    /// Last person key fully handled; `None` before the first record
    pub cursor: Option<PersonId>,
    /// Counters summed over every invocation of the pass so far
    pub totals: RunStats,
    /// 1-based counter of the invocation this token starts
    pub invocation: u32,
    pub pass_started_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    payload: serde_json::Value,
    checksum: String,
}

impl ContinuationToken {
    /// State for the first invocation of a new pass
    #[must_use]
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            version: TOKEN_VERSION,
            cursor: None,
            totals: RunStats::default(),
            invocation: 1,
            pass_started_at: now,
        }
    }

    /// Token for the invocation after this one
    #[must_use]
    pub fn successor(&self, cursor: Option<PersonId>, totals: RunStats) -> Self {
        Self {
            version: TOKEN_VERSION,
            cursor,
            totals,
            invocation: self.invocation.saturating_add(1),
            pass_started_at: self.pass_started_at,
        }
    }

    /// Opaque string form
    ///
    /// # Errors
    /// Returns [`TokenError::Payload`] if serialization fails.
    pub fn encode(&self) -> Result<String, TokenError> {
        let payload =
            serde_json::to_value(self).map_err(|e| TokenError::Payload(e.to_string()))?;
        let checksum = checksum(&payload)?;
        let bytes = serde_json::to_vec(&Envelope { payload, checksum })
            .map_err(|e| TokenError::Payload(e.to_string()))?;
        Ok(hex::encode(bytes))
    }

    /// Parse and verify a token string
    ///
    /// # Errors
    /// - [`TokenError::Encoding`] if the string is not hex
    /// - [`TokenError::Payload`] if the bytes are not a token envelope
    /// - [`TokenError::Checksum`] if the payload was altered
    /// - [`TokenError::Version`] if the token is from another format version
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let bytes = hex::decode(token.trim())?;
        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))?;

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(TokenError::Checksum);
        }

        let version = envelope
            .payload
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| TokenError::Payload("missing version".into()))?;
        if version != u64::from(TOKEN_VERSION) {
            return Err(TokenError::Version {
                found: u32::try_from(version).unwrap_or(u32::MAX),
                expected: TOKEN_VERSION,
            });
        }

        serde_json::from_value(envelope.payload).map_err(|e| TokenError::Payload(e.to_string()))
    }
}

fn checksum(payload: &serde_json::Value) -> Result<String, TokenError> {
    let bytes = serde_json::to_vec(payload).map_err(|e| TokenError::Payload(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(CHECKSUM_DOMAIN);
    hasher.update([0u8]);
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 14, 3, 0, 0).unwrap()
    }

    fn sample() -> ContinuationToken {
        ContinuationToken::fresh(started()).successor(
            Some(PersonId::new("person-0042")),
            RunStats {
                processed: 25,
                updated: 3,
                failed: 1,
                notified: 2,
                skipped: 0,
            },
        )
    }

    #[test]
    fn round_trips() {
        let token = sample();
        let decoded = ContinuationToken::decode(&token.encode().unwrap()).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(decoded.invocation, 2);
    }

    #[test]
    fn rejects_non_hex() {
        assert!(matches!(
            ContinuationToken::decode("not a token"),
            Err(TokenError::Encoding(_))
        ));
    }

    #[test]
    fn rejects_truncation() {
        let encoded = sample().encode().unwrap();
        let truncated = &encoded[..encoded.len() - 10];
        assert!(matches!(
            ContinuationToken::decode(truncated),
            Err(TokenError::Payload(_))
        ));
    }

    #[test]
    fn rejects_edited_payload() {
        let encoded = sample().encode().unwrap();
        let json = String::from_utf8(hex::decode(encoded).unwrap()).unwrap();
        let edited = json.replace("person-0042", "person-9999");
        assert_eq!(
            ContinuationToken::decode(&hex::encode(edited)),
            Err(TokenError::Checksum)
        );
    }

    #[test]
    fn rejects_other_versions() {
        let mut token = sample();
        token.version = 7;
        assert_eq!(
            ContinuationToken::decode(&token.encode().unwrap()),
            Err(TokenError::Version {
                found: 7,
                expected: TOKEN_VERSION
            })
        );
    }

    proptest! {
        #[test]
        fn prop_round_trip(cursor in proptest::option::of("[a-z0-9-]{1,24}"), processed in 0u64..10_000) {
            let token = ContinuationToken::fresh(started()).successor(
                cursor.map(PersonId::new),
                RunStats { processed, ..RunStats::default() },
            );
            let decoded = ContinuationToken::decode(&token.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded, token);
        }

        #[test]
        fn prop_single_byte_flip_is_detected(index in 0usize..64, flip in 1u8..=255) {
            let encoded = sample().encode().unwrap();
            let mut bytes = hex::decode(encoded).unwrap();
            let index = index % bytes.len();
            bytes[index] ^= flip;
            prop_assert!(ContinuationToken::decode(&hex::encode(bytes)).is_err());
        }
    }
}
