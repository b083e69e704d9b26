//! Wall-clock abstraction
//!
//! Age computation and `last_notified` stamps read the date through a
//! [`Clock`] so runs are reproducible.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Real time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable time for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Midnight UTC on the given date
    #[must_use]
    pub fn on(date: NaiveDate) -> Self {
        Self::new(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_its_date() {
        let day = NaiveDate::from_ymd_opt(2024, 7, 19).unwrap();
        let clock = FixedClock::on(day);
        assert_eq!(clock.today(), day);

        let later = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        clock.set(later.and_time(chrono::NaiveTime::MIN).and_utc());
        assert_eq!(clock.today(), later);
    }
}
