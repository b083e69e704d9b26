//! Reconciler configuration
//!
//! Every knob has a default; environment variables override them. Parsing is
//! done against an injectable lookup so tests never touch process env.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound the person store accepts per conditional write batch
pub const MAX_WRITE_BATCH: usize = 25;

/// Fact source call policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Per-call timeout
    pub request_timeout: Duration,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// First backoff delay; doubles per retry
    pub backoff_base: Duration,
    /// Backoff ceiling (a larger `retry_after` hint still wins)
    pub backoff_max: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(10_000),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_millis(30_000),
        }
    }
}

/// Configuration for one reconciliation invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Records requested per scan page
    pub page_size: usize,
    /// Records per conditional write batch (at most [`MAX_WRITE_BATCH`])
    pub write_batch_size: usize,
    /// Records attempted per invocation before handing off
    pub max_records_per_invocation: usize,
    /// Chaining stops once an invocation's counter reaches this value
    pub max_chained_invocations: u32,
    /// Schedule the next invocation automatically when work remains
    pub auto_chain: bool,
    /// Wall-clock budget; no new record work starts once it is spent
    pub time_budget: Duration,
    /// Fact source call policy
    pub source: SourceConfig,
    /// Entries per fact cache (page lookups and facts each)
    pub fact_cache_capacity: u64,
    /// Records resolved concurrently within a page
    pub resolve_concurrency: usize,
    /// Recipients published to concurrently per death
    pub delivery_concurrency: usize,
    /// Publish topic; `None` disables notifications
    pub notification_topic: Option<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            page_size: 25,
            write_batch_size: MAX_WRITE_BATCH,
            max_records_per_invocation: 100,
            max_chained_invocations: 20,
            auto_chain: true,
            time_budget: Duration::from_secs(240),
            source: SourceConfig::default(),
            fact_cache_capacity: 10_000,
            resolve_concurrency: 1,
            delivery_concurrency: 4,
            notification_topic: None,
        }
    }
}

impl ReconcilerConfig {
    /// Load from process environment
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, falling back to defaults
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a value is present but invalid, or the
    /// resulting configuration fails [`validate`](Self::validate).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_first(&lookup, &["PAGE_SIZE", "BATCH_SIZE"])? {
            config.page_size = v;
        }
        if let Some(v) = parse_first(&lookup, &["WRITE_BATCH_SIZE"])? {
            config.write_batch_size = v;
        }
        if let Some(v) = parse_first(&lookup, &["MAX_ITEMS_PER_RUN"])? {
            config.max_records_per_invocation = v;
        }
        if let Some(v) = parse_first(&lookup, &["MAX_CHAINED_INVOCATIONS"])? {
            config.max_chained_invocations = v;
        }
        if let Some(v) = parse_bool(&lookup, "AUTO_CHAIN")? {
            config.auto_chain = v;
        }
        if let Some(secs) = parse_first::<u64, _>(&lookup, &["TIME_BUDGET_SECS"])? {
            config.time_budget = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_first::<u64, _>(&lookup, &["SOURCE_TIMEOUT_MS"])? {
            config.source.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parse_first(&lookup, &["SOURCE_MAX_RETRIES"])? {
            config.source.max_retries = v;
        }
        if let Some(ms) = parse_first::<u64, _>(&lookup, &["SOURCE_BACKOFF_BASE_MS"])? {
            config.source.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_first::<u64, _>(&lookup, &["SOURCE_BACKOFF_MAX_MS"])? {
            config.source.backoff_max = Duration::from_millis(ms);
        }
        if let Some(v) = parse_first(&lookup, &["FACT_CACHE_CAPACITY"])? {
            config.fact_cache_capacity = v;
        }
        if let Some(v) = parse_first(&lookup, &["RESOLVE_CONCURRENCY"])? {
            config.resolve_concurrency = v;
        }
        if let Some(v) = parse_first(&lookup, &["DELIVERY_CONCURRENCY"])? {
            config.delivery_concurrency = v;
        }
        config.notification_topic = ["NOTIFICATION_TOPIC", "SNS_TOPIC_ARN"]
            .iter()
            .find_map(|key| lookup(key))
            .map(|topic| topic.trim().to_string())
            .filter(|topic| !topic.is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.write_batch_size == 0 || self.write_batch_size > MAX_WRITE_BATCH {
            return Err(ConfigError::Invalid(format!(
                "write_batch_size must be within 1..={MAX_WRITE_BATCH}, got {}",
                self.write_batch_size
            )));
        }
        if self.max_records_per_invocation == 0 {
            return Err(ConfigError::Invalid(
                "max_records_per_invocation must be at least 1".into(),
            ));
        }
        if self.time_budget.is_zero() {
            return Err(ConfigError::Invalid("time_budget must be non-zero".into()));
        }
        if self.source.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "source request_timeout must be non-zero".into(),
            ));
        }
        if self.source.backoff_base > self.source.backoff_max {
            return Err(ConfigError::Invalid(
                "source backoff_base must not exceed backoff_max".into(),
            ));
        }
        if self.resolve_concurrency == 0 || self.delivery_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records_per_invocation = max;
        self
    }

    #[must_use]
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    #[must_use]
    pub fn with_auto_chain(mut self, enabled: bool, max_chained: u32) -> Self {
        self.auto_chain = enabled;
        self.max_chained_invocations = max_chained;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.notification_topic = Some(topic.into());
        self
    }
}

fn parse_first<T, F>(lookup: &F, keys: &[&'static str]) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(raw) = lookup(key) {
            return raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue { key: *key, value: raw });
        }
    }
    Ok(None)
}

fn parse_bool<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}
