//! Content fingerprints for person records
//!
//! A [`Fingerprint`] is a SHA-256 digest over the tracked fact fields of a
//! record. It drives two things:
//! - change detection (a fresh computation that matches the stored value means
//!   there is nothing to write)
//! - optimistic concurrency (writes are conditional on the stored value still
//!   matching the one read at scan time)

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest over a record's fact fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the digest bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create a fingerprint from a byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FingerprintError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FingerprintError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Compute the fingerprint of a set of fact fields.
    ///
    /// Every field is framed with a tag byte and a NUL terminator so that
    /// absent and empty values never collide.
    #[must_use]
    pub fn of(facts: &FactFields<'_>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"vigil.person.v1");
        update_date(&mut hasher, b'b', facts.birth_date);
        update_date(&mut hasher, b'd', facts.death_date);
        match facts.age {
            Some(age) => {
                hasher.update([b'a', 1]);
                hasher.update(age.to_le_bytes());
            }
            None => hasher.update([b'a', 0]),
        }
        update_str(&mut hasher, b'i', facts.external_id);
        update_str(&mut hasher, b'p', facts.external_page);
        Self(hasher.finalize().into())
    }

    /// Short representation (first 16 hex chars), for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

fn update_date(hasher: &mut Sha256, tag: u8, date: Option<NaiveDate>) {
    match date {
        Some(date) => {
            hasher.update([tag, 1]);
            hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
            hasher.update([0]);
        }
        None => hasher.update([tag, 0]),
    }
}

fn update_str(hasher: &mut Sha256, tag: u8, value: Option<&str>) {
    match value {
        Some(value) => {
            hasher.update([tag, 1]);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        None => hasher.update([tag, 0]),
    }
}

/// Borrowed view of the fields covered by a [`Fingerprint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactFields<'a> {
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
    pub age: Option<u32>,
    pub external_id: Option<&'a str>,
    pub external_page: Option<&'a str>,
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

// Stored as a hex string, the same way the item lands in the table.
impl serde::Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when parsing a fingerprint
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Invalid digest length
    #[error("invalid fingerprint length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex decoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
