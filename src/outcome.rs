//! Outcome reporting for the batching write API.
//!
//! Every batch ends with exactly one terminal outcome, success or fatal.
//! Retries along the way are reported as they happen. Outcomes go to the
//! registered callbacks and, if one was requested, to an outcome channel.
//! Anything not picked up by a callback or channel is logged.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::batch::Batch;
use crate::error::Error;
use crate::types::DestinationKey;

/// Callback for a delivered batch: `(key, payload)`.
pub type SuccessCallback = Arc<dyn Fn(&DestinationKey, &str) + Send + Sync>;

/// Callback for a failed or retried batch: `(key, payload, error)`.
pub type ErrorCallback = Arc<dyn Fn(&DestinationKey, &str, &Error) + Send + Sync>;

/// What happened to a batch.
#[derive(Debug)]
pub enum OutcomeKind {
    /// The batch was accepted.
    Success,
    /// An attempt failed and the batch will be tried again.
    Retryable(Error),
    /// The batch was given up on.
    Fatal(Error),
}

/// A batch outcome.
#[derive(Debug)]
pub struct Outcome {
    /// Destination of the batch.
    pub key: DestinationKey,
    /// The request body.
    pub payload: String,
    /// What happened.
    pub kind: OutcomeKind,
}

impl Outcome {
    pub(crate) fn new(batch: &Batch, kind: OutcomeKind) -> Self {
        Self {
            key: batch.key().clone(),
            payload: batch.payload().to_string(),
            kind,
        }
    }

    /// True for [`OutcomeKind::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self.kind, OutcomeKind::Success)
    }

    /// True for [`OutcomeKind::Fatal`].
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, OutcomeKind::Fatal(_))
    }
}

/// Dispatches outcomes to callbacks and an optional channel.
#[derive(Clone, Default)]
pub struct OutcomeRouter {
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
    on_retry: Option<ErrorCallback>,
    channel: Option<mpsc::UnboundedSender<Outcome>>,
}

impl std::fmt::Debug for OutcomeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeRouter")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("channel", &self.channel.is_some())
            .finish()
    }
}

impl OutcomeRouter {
    /// Router with nothing registered; every outcome is logged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per delivered batch.
    #[must_use]
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DestinationKey, &str) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Called once per batch that is given up on.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DestinationKey, &str, &Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Called for every failed attempt that will be retried.
    ///
    /// Runs on the delivery task, so it may be called concurrently for
    /// different batches.
    #[must_use]
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DestinationKey, &str, &Error) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Also send every outcome to the returned receiver.
    pub fn with_channel(mut self) -> (Self, mpsc::UnboundedReceiver<Outcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channel = Some(tx);
        (self, rx)
    }

    /// Deliver one outcome.
    pub fn route(&self, outcome: Outcome) {
        let handled = match &outcome.kind {
            OutcomeKind::Success => self.on_success.as_ref().map(|cb| cb(&outcome.key, &outcome.payload)),
            OutcomeKind::Retryable(e) => self.on_retry.as_ref().map(|cb| cb(&outcome.key, &outcome.payload, e)),
            OutcomeKind::Fatal(e) => self.on_error.as_ref().map(|cb| cb(&outcome.key, &outcome.payload, e)),
        }
        .is_some();

        let outcome = match &self.channel {
            Some(tx) => match tx.send(outcome) {
                Ok(()) => return,
                // Receiver dropped, fall through to logging if nothing else saw it.
                Err(mpsc::error::SendError(outcome)) => outcome,
            },
            None => outcome,
        };

        if !handled {
            log_outcome(&outcome);
        }
    }
}

fn log_outcome(outcome: &Outcome) {
    let key = &outcome.key;
    match &outcome.kind {
        OutcomeKind::Success => debug!(
            bucket = %key.bucket,
            org = %key.org,
            precision = %key.precision,
            bytes = outcome.payload.len(),
            "Batch written",
        ),
        OutcomeKind::Retryable(e) => warn!(
            bucket = %key.bucket,
            org = %key.org,
            error = %e,
            "Batch write failed, will retry",
        ),
        OutcomeKind::Fatal(e) => error!(
            bucket = %key.bucket,
            org = %key.org,
            precision = %key.precision,
            error = %e,
            "Batch write failed",
        ),
    }
}
