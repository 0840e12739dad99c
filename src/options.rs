//! Write pipeline configuration.
//!
//! [`WriteOptions`] can be built in code with the `with_*` setters or
//! deserialized with serde. Durations in serialized form accept either an
//! integer number of milliseconds or a Go-style duration string such as
//! `"5s"` or `"1m30s"`.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::RngCore;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::retry::JitterRng;

/// Tuning for batching and retry.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Lines per batch before a window closes.
    pub batch_size: usize,
    /// Longest a window stays open.
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,
    /// Upper bound of the random delay before each batch is first sent and
    /// added to every retry delay.
    #[serde(with = "duration_serde")]
    pub jitter_interval: Duration,
    /// Delay before the first retry.
    #[serde(with = "duration_serde")]
    pub retry_interval: Duration,
    /// Retries allowed per batch. Zero disables retrying.
    pub total_retries: u32,
    /// Upper bound for a computed retry delay.
    #[serde(with = "duration_serde")]
    pub max_retry_delay: Duration,
    /// Time budget for one batch, measured from its first attempt. Zero
    /// disables retrying.
    #[serde(with = "duration_serde")]
    pub max_retry_time: Duration,
    /// Growth factor between consecutive retry delays.
    pub exponential_base: u32,
    /// Batches delivered at the same time.
    pub max_concurrency: usize,
    /// Statuses below 429 that are also treated as transient. Every status
    /// from 429 up is always retried.
    pub retryable_statuses: Vec<u16>,
    /// Source of jitter.
    #[serde(skip)]
    pub jitter_rng: JitterRng,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            flush_interval: Duration::from_millis(1_000),
            jitter_interval: Duration::ZERO,
            retry_interval: Duration::from_millis(5_000),
            total_retries: 5,
            max_retry_delay: Duration::from_millis(125_000),
            max_retry_time: Duration::from_millis(180_000),
            exponential_base: 2,
            max_concurrency: 1,
            retryable_statuses: Vec::new(),
            jitter_rng: JitterRng::default(),
        }
    }
}

impl WriteOptions {
    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the flush interval.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Sets the jitter interval.
    #[must_use]
    pub fn with_jitter_interval(mut self, jitter_interval: Duration) -> Self {
        self.jitter_interval = jitter_interval;
        self
    }

    /// Sets the first retry delay.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Sets the number of retries per batch.
    #[must_use]
    pub fn with_total_retries(mut self, total_retries: u32) -> Self {
        self.total_retries = total_retries;
        self
    }

    /// Sets the retry delay ceiling.
    #[must_use]
    pub fn with_max_retry_delay(mut self, max_retry_delay: Duration) -> Self {
        self.max_retry_delay = max_retry_delay;
        self
    }

    /// Sets the per-batch time budget.
    #[must_use]
    pub fn with_max_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.max_retry_time = max_retry_time;
        self
    }

    /// Sets the exponential base.
    #[must_use]
    pub fn with_exponential_base(mut self, exponential_base: u32) -> Self {
        self.exponential_base = exponential_base;
        self
    }

    /// Sets how many batches may be in flight at once.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets extra statuses to retry, e.g. 408.
    #[must_use]
    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Sets the random number generator used for jitter.
    ///
    /// Meant for tests that need deterministic delays.
    #[must_use]
    pub fn with_rng<R>(mut self, rng: R) -> Self
    where
        R: RngCore + Send + Sync + 'static,
    {
        self.jitter_rng = JitterRng::shared(rng);
        self
    }

    /// Parse options from a JSON document and validate them.
    ///
    /// Keys that are absent keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: WriteOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Check the options for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        if self.max_concurrency == 0 {
            return Err(Error::config("max_concurrency must be at least 1"));
        }
        if self.exponential_base < 1 {
            return Err(Error::config("exponential_base must be at least 1"));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::config("flush_interval must be greater than zero"));
        }
        Ok(())
    }
}

/// Tags added to every point written through an API.
///
/// A value of the form `${env.NAME}` is replaced with the environment
/// variable `NAME` when the API is created. Unset variables drop the tag.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PointSettings {
    /// Tag key to value (or `${env.NAME}` reference).
    pub default_tags: BTreeMap<String, String>,
}

impl PointSettings {
    /// Empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a default tag.
    #[must_use]
    pub fn with_default_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_tags.insert(key.into(), value.into());
        self
    }

    /// Default tags with environment references expanded.
    pub fn resolve(&self) -> BTreeMap<String, String> {
        let mut resolved = BTreeMap::new();
        for (key, value) in &self.default_tags {
            match env_reference(value) {
                Some(name) => match std::env::var(name) {
                    Ok(v) => {
                        resolved.insert(key.clone(), v);
                    }
                    Err(_) => debug!(tag = %key, var = name, "environment variable not set, dropping default tag"),
                },
                None => {
                    resolved.insert(key.clone(), value.clone());
                }
            }
        }
        resolved
    }
}

fn env_reference(value: &str) -> Option<&str> {
    value.strip_prefix("${env.")?.strip_suffix('}')
}

mod duration_serde {
    use std::time::Duration;

    use go_parse_duration::parse_duration;
    use serde::{Deserialize, Deserializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(s) => {
                let nanos = parse_duration(&s)
                    .map_err(|_| de::Error::custom(format!("invalid duration '{s}'")))?;
                let nanos = u64::try_from(nanos)
                    .map_err(|_| de::Error::custom(format!("negative duration '{s}'")))?;
                Ok(Duration::from_nanos(nanos))
            }
        }
    }
}
