//! Retry policy for fact source calls

use std::time::Duration;

use crate::config::SourceConfig;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    ///
    /// `base * 2^retry`, capped at `backoff_max`, then raised to the server's
    /// `retry_after` hint if that is longer.
    #[must_use]
    pub fn delay_for(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let backoff = self
            .backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max));
        hint.map_or(backoff, |hint| backoff.max(hint))
    }

    /// Whether another attempt is allowed after `retries_so_far` retries
    #[inline]
    #[must_use]
    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }
}

impl From<&SourceConfig> for RetryPolicy {
    fn from(config: &SourceConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SourceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        }
    }

    #[test]
    fn doubles_then_caps() {
        let p = policy();
        assert_eq!(p.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(p.delay_for(1, None), Duration::from_millis(200));
        assert_eq!(p.delay_for(3, None), Duration::from_millis(800));
        assert_eq!(p.delay_for(4, None), Duration::from_secs(1));
        assert_eq!(p.delay_for(40, None), Duration::from_secs(1));
    }

    #[test]
    fn longer_hint_wins() {
        let p = policy();
        assert_eq!(
            p.delay_for(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
        assert_eq!(
            p.delay_for(2, Some(Duration::from_millis(10))),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn retry_ceiling_counts_retries_not_attempts() {
        let p = policy();
        assert!(p.allows_retry(0));
        assert!(p.allows_retry(2));
        assert!(!p.allows_retry(3));
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap_without_hint(retry in 0u32..100) {
            prop_assert!(policy().delay_for(retry, None) <= Duration::from_secs(1));
        }

        #[test]
        fn prop_delay_is_monotonic(retry in 0u32..60) {
            let p = policy();
            prop_assert!(p.delay_for(retry, None) <= p.delay_for(retry + 1, None));
        }
    }
}
