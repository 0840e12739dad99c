//! Batch delivery.
//!
//! [`Transport`] is the only thing the pipeline needs from the outside world:
//! send one payload to one destination. [`deliver`] drives a single batch
//! through the retry policy and is shared by both write modes.
//!
//! [`Dispatcher`] belongs to the batching worker. It keeps a FIFO of batches
//! waiting to start and a map of batches in flight, runs at most
//! `max_concurrency` deliveries at once, and routes each batch's terminal
//! outcome exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error};

use crate::batch::Batch;
use crate::error::{Error, Result};
use crate::outcome::{Outcome, OutcomeKind, OutcomeRouter};
use crate::retry::{DeliveryFailure, RetryDecision, RetryState, RetryStrategy};
use crate::types::DestinationKey;

/// Sends a payload to a destination.
///
/// Implementations make a single attempt; retrying is handled by the caller.
pub trait Transport: Send + Sync + 'static {
    /// Send `payload` to `key`.
    fn send<'a>(
        &'a self,
        key: &'a DestinationKey,
        payload: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), DeliveryFailure>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send<'a>(
        &'a self,
        key: &'a DestinationKey,
        payload: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), DeliveryFailure>> {
        (**self).send(key, payload)
    }
}

/// Deliver `batch`, retrying as `strategy` allows.
///
/// `on_retry` sees every failure that is followed by another attempt.
pub async fn deliver<F>(
    transport: &dyn Transport,
    strategy: &RetryStrategy,
    batch: &Batch,
    mut on_retry: F,
) -> Result<()>
where
    F: FnMut(Error),
{
    let mut state = RetryState::new();
    loop {
        let failure = match transport.send(batch.key(), batch.payload()).await {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };

        match strategy.on_failure(&mut state, failure) {
            RetryDecision::Retry { delay, error } => {
                on_retry(error);
                tokio::time::sleep(delay).await;
            }
            RetryDecision::Fail(error) => return Err(error),
        }
    }
}

/// Queue and in-flight bookkeeping for the batching worker.
pub(crate) struct Dispatcher {
    transport: Arc<dyn Transport>,
    strategy: RetryStrategy,
    router: Arc<OutcomeRouter>,
    max_concurrency: usize,
    pending: VecDeque<Arc<Batch>>,
    in_flight: HashMap<Id, Arc<Batch>>,
    tasks: JoinSet<Result<()>>,
}

impl Dispatcher {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        strategy: RetryStrategy,
        router: Arc<OutcomeRouter>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            transport,
            strategy,
            router,
            max_concurrency: max_concurrency.max(1),
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Queue batches and start as many as concurrency allows.
    pub(crate) fn enqueue(&mut self, batches: Vec<Batch>) {
        self.pending.extend(batches.into_iter().map(Arc::new));
        self.start_ready();
    }

    /// True while any batch is waiting or in flight.
    pub(crate) fn is_busy(&self) -> bool {
        !self.pending.is_empty() || !self.in_flight.is_empty()
    }

    /// True while any delivery task is running.
    pub(crate) fn has_in_flight(&self) -> bool {
        !self.tasks.is_empty()
    }

    fn start_ready(&mut self) {
        while self.in_flight.len() < self.max_concurrency {
            let Some(batch) = self.pending.pop_front() else {
                break;
            };

            debug!(
                bucket = %batch.key().bucket,
                org = %batch.key().org,
                precision = %batch.key().precision,
                lines = batch.len(),
                "Dispatching batch",
            );

            let transport = self.transport.clone();
            let strategy = self.strategy.clone();
            let router = self.router.clone();
            let task_batch = batch.clone();

            let handle = self.tasks.spawn(async move {
                let jitter = strategy.jitter();
                if !jitter.is_zero() {
                    tokio::time::sleep(jitter).await;
                }
                deliver(transport.as_ref(), &strategy, &task_batch, |error| {
                    router.route(Outcome::new(&task_batch, OutcomeKind::Retryable(error)));
                })
                .await
            });
            self.in_flight.insert(handle.id(), batch);
        }
    }

    /// Wait for the next delivery to finish, route its outcome and start the
    /// next pending batch. Returns false when nothing was in flight.
    pub(crate) async fn complete_next(&mut self) -> bool {
        let Some(joined) = self.tasks.join_next_with_id().await else {
            return false;
        };
        self.finish(joined);
        self.start_ready();
        true
    }

    /// Route the outcome of a joined delivery task.
    fn finish(&mut self, joined: std::result::Result<(Id, Result<()>), JoinError>) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => {
                let reason = if e.is_cancelled() { "cancelled" } else { "panicked" };
                (e.id(), Err(Error::TaskFailed(reason.to_string())))
            }
        };

        match self.in_flight.remove(&id) {
            Some(batch) => {
                let kind = match result {
                    Ok(()) => OutcomeKind::Success,
                    Err(e) => OutcomeKind::Fatal(e),
                };
                self.router.route(Outcome::new(&batch, kind));
            }
            None => error!(?id, "Finished delivery task has no batch"),
        }
    }

    /// Run until every pending and in-flight batch is finished.
    pub(crate) async fn drain(&mut self) {
        while self.is_busy() {
            if !self.complete_next().await {
                // Pending batches with nothing running; start them.
                self.start_ready();
            }
        }
    }

    /// Abort everything still queued or running and report each batch as
    /// failed with `reason`. Returns the number of abandoned batches.
    pub(crate) fn abandon(&mut self, reason: impl Fn() -> Error) -> usize {
        // Deliveries that already finished keep their real outcome.
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.finish(joined);
        }

        self.tasks.abort_all();
        self.tasks.detach_all();

        let mut abandoned = 0;
        for batch in self.in_flight.drain().map(|(_, b)| b).chain(self.pending.drain(..)) {
            self.router.route(Outcome::new(&batch, OutcomeKind::Fatal(reason())));
            abandoned += 1;
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::WriteOptions;
    use crate::types::WritePrecision;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` sends with 503, then succeeds.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Transport for Flaky {
        fn send<'a>(
            &'a self,
            _key: &'a DestinationKey,
            _payload: &'a str,
        ) -> BoxFuture<'a, std::result::Result<(), DeliveryFailure>> {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.failures {
                    Err(DeliveryFailure::status(503, "unavailable"))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn batch() -> Batch {
        Batch::new(
            DestinationKey::new("bucket", "org", WritePrecision::Ns),
            vec!["m v=1".to_string()],
        )
    }

    fn strategy(retries: u32) -> RetryStrategy {
        RetryStrategy::from_options(
            &WriteOptions::default()
                .with_retry_interval(Duration::from_secs(1))
                .with_total_retries(retries),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_retries_then_succeeds() {
        let transport = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let mut retries = Vec::new();

        let start = tokio::time::Instant::now();
        deliver(&transport, &strategy(5), &batch(), |e| retries.push(e.status()))
            .await
            .unwrap();

        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![Some(503), Some(503)]);
        // 1s + 2s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_exhausts() {
        let transport = Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };

        let err = deliver(&transport, &strategy(5), &batch(), |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 6, .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_routes_once_per_batch() {
        let transport: Arc<dyn Transport> = Arc::new(Flaky {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let router = OutcomeRouter::new().on_success(move |_, payload| s.lock().unwrap().push(payload.to_string()));

        let mut dispatcher = Dispatcher::new(transport, strategy(5), Arc::new(router), 1);
        dispatcher.enqueue(vec![batch(), batch()]);
        assert!(dispatcher.is_busy());
        assert!(dispatcher.has_in_flight());

        dispatcher.drain().await;
        assert!(!dispatcher.is_busy());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_reports_all() {
        let transport: Arc<dyn Transport> = Arc::new(Flaky {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let (router, mut rx) = OutcomeRouter::new().with_channel();

        let mut dispatcher = Dispatcher::new(transport, strategy(5), Arc::new(router), 1);
        dispatcher.enqueue(vec![batch(), batch(), batch()]);

        let abandoned = dispatcher.abandon(|| Error::ShutdownTimeout(Duration::from_secs(1)));
        assert_eq!(abandoned, 3);
        assert!(!dispatcher.is_busy());

        let mut fatal = 0;
        while let Ok(outcome) = rx.try_recv() {
            if let OutcomeKind::Fatal(Error::ShutdownTimeout(_)) = outcome.kind {
                fatal += 1;
            }
        }
        assert_eq!(fatal, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_keeps_finished_results() {
        let transport: Arc<dyn Transport> = Arc::new(Flaky {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let (router, mut rx) = OutcomeRouter::new().with_channel();

        let mut dispatcher = Dispatcher::new(transport, strategy(5), Arc::new(router), 1);
        dispatcher.enqueue(vec![batch(), batch()]);

        // Let the first delivery finish without joining it
        tokio::time::sleep(Duration::from_millis(1)).await;

        let abandoned = dispatcher.abandon(|| Error::ShutdownTimeout(Duration::from_secs(1)));
        assert_eq!(abandoned, 1);
        assert!(!dispatcher.is_busy());

        let first = rx.try_recv().unwrap();
        assert!(first.is_success());
        let second = rx.try_recv().unwrap();
        assert!(matches!(second.kind, OutcomeKind::Fatal(Error::ShutdownTimeout(_))));
        assert!(rx.try_recv().is_err());
    }
}
