//! Retry and backoff for batch delivery.
//!
//! A [`RetryStrategy`] classifies each failed attempt and answers either
//! "wait this long and try again" or "give up with this error". The per-batch
//! bookkeeping lives in a [`RetryState`] created when the batch is first sent.
//!
//! Delay for the n-th consecutive failure is
//! `retry_interval * exponential_base^(n - 1) + jitter`, capped at
//! `max_retry_delay`. Redirects count as attempts but break the run of
//! consecutive failures. A server-supplied `Retry-After` replaces the
//! computed delay.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::{Rng as _, RngCore, thread_rng};
use tokio::time::Instant;
use tracing::warn;

use crate::error::Error;
use crate::options::WriteOptions;

/// Random source for jitter.
#[derive(Clone, Default)]
pub enum JitterRng {
    /// Thread-local CSPRNG seeded by the operating system.
    #[default]
    SecureDefault,

    /// A shared generator, typically seeded for tests.
    Shared(Arc<Mutex<Box<dyn RngCore + Send + Sync>>>),
}

impl fmt::Debug for JitterRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JitterRng::SecureDefault => f.debug_tuple("SecureDefault").finish(),
            JitterRng::Shared(_) => f.debug_tuple("Shared").finish(),
        }
    }
}

impl JitterRng {
    /// Wrap `rng` so it can be shared between deliveries.
    pub fn shared<R>(rng: R) -> Self
    where
        R: RngCore + Send + Sync + 'static,
    {
        JitterRng::Shared(Arc::new(Mutex::new(Box::new(rng))))
    }

    /// Uniform random duration in `[0, max)`.
    pub fn jitter(&self, max: Duration) -> Duration {
        let upper = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
        if upper == 0 {
            return Duration::ZERO;
        }
        let nanos = match self {
            JitterRng::SecureDefault => thread_rng().gen_range(0..upper),
            JitterRng::Shared(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(0..upper),
        };
        Duration::from_nanos(nanos)
    }
}

/// How one delivery attempt failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The server answered with a non-success status.
    Status {
        /// HTTP status.
        status: u16,
        /// Server message, usually from the JSON error body.
        message: String,
        /// Parsed `Retry-After`, if the server sent one.
        retry_after: Option<Duration>,
    },
    /// The server answered with a redirect that was not followed.
    Redirect {
        /// HTTP status.
        status: u16,
        /// `Location` header, if present.
        location: Option<String>,
    },
    /// No response was received.
    Network(String),
}

impl DeliveryFailure {
    /// Failure of a request that never got a response.
    pub fn network(message: impl Into<String>) -> Self {
        DeliveryFailure::Network(message.into())
    }

    /// Failure with a status and no `Retry-After`.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        DeliveryFailure::Status {
            status,
            message: message.into(),
            retry_after: None,
        }
    }
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Status { status, message, .. } => write!(f, "HTTP {status}: {message}"),
            DeliveryFailure::Redirect { status, location } => match location {
                Some(location) => write!(f, "HTTP {status}: redirected to {location}"),
                None => write!(f, "HTTP {status}: redirected"),
            },
            DeliveryFailure::Network(message) => f.write_str(message),
        }
    }
}

/// Next step after a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Try again after `delay`.
    Retry {
        /// Time to wait before the next attempt.
        delay: Duration,
        /// The failure being retried.
        error: Error,
    },
    /// Stop and report `error`.
    Fail(Error),
}

/// Bookkeeping for one batch.
#[derive(Debug)]
pub struct RetryState {
    /// One entry per failed attempt; `true` marks a redirect.
    history: Vec<bool>,
    retries_used: u32,
    started: Instant,
}

impl RetryState {
    /// Start tracking from now.
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            retries_used: 0,
            started: Instant::now(),
        }
    }

    /// Failed attempts so far.
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.history.len()).unwrap_or(u32::MAX)
    }

    /// Retries already granted.
    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    /// Time since the state was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Length of the trailing run of non-redirect failures.
    fn consecutive_failures(&self) -> u32 {
        let run = self.history.iter().rev().take_while(|redirect| !**redirect).count();
        u32::try_from(run).unwrap_or(u32::MAX)
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry policy derived from [`WriteOptions`].
#[derive(Clone, Debug)]
pub struct RetryStrategy {
    retry_interval: Duration,
    exponential_base: u32,
    max_retry_delay: Duration,
    jitter_interval: Duration,
    total_retries: u32,
    max_retry_time: Duration,
    retryable_statuses: Vec<u16>,
    rng: JitterRng,
}

impl RetryStrategy {
    /// Build the policy described by `options`.
    pub fn from_options(options: &WriteOptions) -> Self {
        Self {
            retry_interval: options.retry_interval,
            exponential_base: options.exponential_base,
            max_retry_delay: options.max_retry_delay,
            jitter_interval: options.jitter_interval,
            total_retries: options.total_retries,
            max_retry_time: options.max_retry_time,
            retryable_statuses: options.retryable_statuses.clone(),
            rng: options.jitter_rng.clone(),
        }
    }

    /// Random delay in `[0, jitter_interval)`, applied before a batch is
    /// first sent.
    pub fn jitter(&self) -> Duration {
        self.rng.jitter(self.jitter_interval)
    }

    /// Backoff for the current trailing run of failures, without a
    /// `Retry-After` override.
    pub fn backoff(&self, state: &RetryState) -> Duration {
        let run = state.consecutive_failures();
        if run == 0 {
            return Duration::ZERO;
        }
        let factor = self.exponential_base.saturating_pow(run - 1);
        let delay = self.retry_interval.saturating_mul(factor).saturating_add(self.jitter());
        delay.min(self.max_retry_delay)
    }

    /// Whether a status is treated as transient: anything from 429 up,
    /// plus the configured extras.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        status >= 429 || self.retryable_statuses.contains(&status)
    }

    /// Record a failed attempt and decide what to do next.
    pub fn on_failure(&self, state: &mut RetryState, failure: DeliveryFailure) -> RetryDecision {
        let (error, retry_after) = match failure {
            DeliveryFailure::Status {
                status,
                message,
                retry_after,
            } => {
                state.history.push(false);
                if !self.is_retryable_status(status) {
                    return RetryDecision::Fail(Error::PermanentDelivery { status, message });
                }
                let error = Error::TransientDelivery {
                    status: Some(status),
                    message,
                    retry_after,
                };
                (error, retry_after)
            }
            DeliveryFailure::Redirect { status, location } => {
                state.history.push(true);
                let message = match location {
                    Some(location) => format!("redirected to {location}"),
                    None => "redirected".to_string(),
                };
                let error = Error::TransientDelivery {
                    status: Some(status),
                    message,
                    retry_after: None,
                };
                (error, None)
            }
            DeliveryFailure::Network(message) => {
                state.history.push(false);
                let error = Error::TransientDelivery {
                    status: None,
                    message,
                    retry_after: None,
                };
                (error, None)
            }
        };

        let exhausted = if state.retries_used >= self.total_retries {
            Some("too many error responses")
        } else if state.elapsed() >= self.max_retry_time {
            Some("max_retry_time exceeded")
        } else {
            None
        };

        if let Some(reason) = exhausted {
            return RetryDecision::Fail(Error::RetriesExhausted {
                attempts: state.attempts(),
                reason: reason.to_string(),
                source: Box::new(error),
            });
        }

        let delay = match retry_after {
            Some(after) => after.saturating_add(self.jitter()),
            None => self.backoff(state),
        };
        state.retries_used += 1;

        warn!(
            attempt = state.attempts(),
            delay_secs = delay.as_secs_f64(),
            reason = %error,
            "Retryable write failure, retrying",
        );

        RetryDecision::Retry { delay, error }
    }
}
