//! Phone number normalization
//!
//! Numbers arrive from a sign-up form and frequently carry invisible
//! formatting: zero-width joiners, bidi marks pasted from contact apps,
//! non-breaking spaces. Normalization strips every non-ASCII character and the
//! ASCII punctuation people type for readability, then requires E.164 shape.

use std::fmt::{self, Display, Formatter};

/// Minimum digit count accepted after the `+` prefix
pub const MIN_DIGITS: usize = 7;
/// Maximum digit count allowed by E.164
pub const MAX_DIGITS: usize = 15;

/// A normalized E.164 phone number (`+` followed by digits only).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize and validate a raw phone number.
    ///
    /// # Errors
    /// - [`PhoneError::Empty`] if nothing remains after stripping
    /// - [`PhoneError::InvalidCharacter`] for ASCII letters or symbols
    /// - [`PhoneError::MissingCountryCode`] if the number lacks a leading `+`
    /// - [`PhoneError::InvalidLength`] if the digit count is outside E.164 bounds
    pub fn parse(raw: &str) -> Result<Self, PhoneError> {
        let mut out = String::with_capacity(raw.len());
        for ch in raw.chars() {
            if !ch.is_ascii() || is_ascii_formatting(ch) {
                continue;
            }
            match ch {
                '+' if out.is_empty() => out.push('+'),
                d if d.is_ascii_digit() => out.push(d),
                other => return Err(PhoneError::InvalidCharacter(other)),
            }
        }

        if out.is_empty() {
            return Err(PhoneError::Empty);
        }
        let Some(digits) = out.strip_prefix('+') else {
            return Err(PhoneError::MissingCountryCode);
        };
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            return Err(PhoneError::InvalidLength(digits.len()));
        }
        if digits.starts_with('0') {
            return Err(PhoneError::MissingCountryCode);
        }

        Ok(Self(out))
    }

    /// The normalized number, including the `+` prefix
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last four digits, for logs
    #[must_use]
    pub fn masked(&self) -> String {
        let tail = &self.0[self.0.len().saturating_sub(4)..];
        format!("***{tail}")
    }
}

fn is_ascii_formatting(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '-' | '.' | '(' | ')' | '/')
}

impl Display for PhoneNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Phone normalization errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    /// Nothing left after stripping formatting
    #[error("phone number is empty")]
    Empty,

    /// Character that is neither a digit nor formatting
    #[error("invalid character in phone number: {0:?}")]
    InvalidCharacter(char),

    /// Not in international format
    #[error("phone number must start with + and a country code")]
    MissingCountryCode,

    /// Digit count outside E.164 bounds
    #[error("phone number has {0} digits, expected 7..=15")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_e164_is_unchanged() {
        let phone = PhoneNumber::parse("+14155550123").unwrap();
        assert_eq!(phone.as_str(), "+14155550123");
    }

    #[test]
    fn strips_directional_and_zero_width_marks() {
        let raw = "\u{202A}+1\u{200B}415\u{200E}555\u{2069}0123\u{202C}";
        let phone = PhoneNumber::parse(raw).unwrap();
        assert_eq!(phone, PhoneNumber::parse("+14155550123").unwrap());
    }

    #[test]
    fn strips_human_formatting() {
        let phone = PhoneNumber::parse("+1 (415) 555-0123").unwrap();
        assert_eq!(phone.as_str(), "+14155550123");
    }

    #[test]
    fn rejects_letters() {
        assert_eq!(
            PhoneNumber::parse("+1XXXXXXXXXX"),
            Err(PhoneError::InvalidCharacter('X'))
        );
    }

    #[test]
    fn rejects_missing_plus() {
        assert_eq!(
            PhoneNumber::parse("4155550123"),
            Err(PhoneError::MissingCountryCode)
        );
    }

    #[test]
    fn rejects_bad_lengths() {
        assert_eq!(PhoneNumber::parse("+12345"), Err(PhoneError::InvalidLength(5)));
        assert_eq!(
            PhoneNumber::parse("+1234567890123456"),
            Err(PhoneError::InvalidLength(16))
        );
        assert_eq!(PhoneNumber::parse("\u{200B}"), Err(PhoneError::Empty));
    }

    #[test]
    fn length_bounds_are_inclusive() {
        assert_eq!(PhoneNumber::parse("+2901234").unwrap().as_str(), "+2901234");
        assert_eq!(PhoneNumber::parse("+290123"), Err(PhoneError::InvalidLength(MIN_DIGITS - 1)));
        assert!(PhoneNumber::parse("+123456789012345").is_ok());
    }

    #[test]
    fn masked_shows_only_tail() {
        let phone = PhoneNumber::parse("+14155550123").unwrap();
        assert_eq!(phone.masked(), "***0123");
    }

    const INVISIBLES: &[char] = &[
        '\u{200B}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}', '\u{202A}', '\u{202B}',
        '\u{202C}', '\u{202D}', '\u{202E}', '\u{2066}', '\u{2067}', '\u{2068}', '\u{2069}',
        '\u{FEFF}', '\u{00A0}',
    ];

    proptest! {
        #[test]
        fn prop_invisible_marks_never_change_result(
            digits in "[1-9][0-9]{9,13}",
            inserts in proptest::collection::vec((0usize..20, 0usize..16), 0..6),
        ) {
            let clean = format!("+{digits}");
            let mut noisy: Vec<char> = clean.chars().collect();
            for (pos, mark) in inserts {
                let pos = pos.min(noisy.len());
                noisy.insert(pos, INVISIBLES[mark]);
            }
            let noisy: String = noisy.into_iter().collect();
            prop_assert_eq!(PhoneNumber::parse(&noisy), PhoneNumber::parse(&clean));
        }
    }
}
