//! Age arithmetic

use chrono::{Datelike, NaiveDate};

/// Whole years elapsed between `birth` and `end`.
///
/// A birthday that has not yet occurred in `end`'s year does not count.
/// Returns 0 when `end` precedes `birth`.
#[must_use]
pub fn age_between(birth: NaiveDate, end: NaiveDate) -> u32 {
    let mut years = end.year() - birth.year();
    if (end.month(), end.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}

/// Age of a person: at death when known, otherwise as of `today`.
#[inline]
#[must_use]
pub fn age_at(birth: NaiveDate, death: Option<NaiveDate>, today: NaiveDate) -> u32 {
    age_between(birth, death.unwrap_or(today))
}
