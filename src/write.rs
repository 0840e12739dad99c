//! Write APIs.
//!
//! [`WriteApi`] batches records in the background: `submit` encodes the record
//! and hands it to a worker task, which windows, groups and delivers lines
//! and reports what happened through an [`OutcomeRouter`].
//!
//! [`SyncWriteApi`] sends each call's records right away and returns the
//! result to the caller.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use influxdb_write::{Client, Point, WriteOptions, WritePrecision};
//!
//! let client = Client::new("http://localhost:8086", "my-org", "my-token")?;
//! let write_api = client.write_api(WriteOptions::default().with_batch_size(500))?;
//!
//! write_api.submit(
//!     "sensors",
//!     "my-org",
//!     Point::measurement("temperature").tag("room", "kitchen").field("value", 21.5),
//!     WritePrecision::Ns,
//! )?;
//!
//! write_api.close(Some(Duration::from_secs(10))).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::{BatchWindow, group_by_key};
use crate::dispatch::{Dispatcher, Transport, deliver};
use crate::encoder::LineProtocolEncoder;
use crate::error::{Error, Result};
use crate::options::{PointSettings, WriteOptions};
use crate::outcome::OutcomeRouter;
use crate::point::Record;
use crate::retry::RetryStrategy;
use crate::types::{DestinationKey, WritePrecision};

/// Messages from the API handle to the worker.
enum Command {
    Write { key: DestinationKey, line: String },
    Flush(oneshot::Sender<()>),
    Close {
        timeout: Option<Duration>,
        done: oneshot::Sender<usize>,
    },
}

/// Encode records and apply default tags. Shared by both modes.
#[derive(Clone, Debug, Default)]
struct RecordEncoder {
    encoder: LineProtocolEncoder,
    default_tags: BTreeMap<String, String>,
}

impl RecordEncoder {
    fn encode(
        &self,
        bucket: &str,
        org: &str,
        record: Record,
        precision: WritePrecision,
    ) -> Result<Option<(DestinationKey, String)>> {
        match self.encoder.encode_record(record, precision, &self.default_tags)? {
            Some((precision, line)) => Ok(Some((DestinationKey::new(bucket, org, precision), line))),
            None => {
                debug!(bucket, org, "Record has no fields to write, skipping");
                Ok(None)
            }
        }
    }

    fn encode_all<I, R>(
        &self,
        bucket: &str,
        org: &str,
        records: I,
        precision: WritePrecision,
    ) -> Result<Vec<(DestinationKey, String)>>
    where
        I: IntoIterator<Item = R>,
        R: Into<Record>,
    {
        let mut lines = Vec::new();
        for record in records {
            if let Some(entry) = self.encode(bucket, org, record.into(), precision)? {
                lines.push(entry);
            }
        }
        Ok(lines)
    }
}

/// Builder for [`WriteApi`].
pub struct WriteApiBuilder {
    transport: Arc<dyn Transport>,
    options: WriteOptions,
    router: OutcomeRouter,
    point_settings: PointSettings,
    encoder: LineProtocolEncoder,
}

impl WriteApiBuilder {
    /// Start from default options and an empty router.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            options: WriteOptions::default(),
            router: OutcomeRouter::new(),
            point_settings: PointSettings::default(),
            encoder: LineProtocolEncoder::default(),
        }
    }

    /// Set batching and retry options.
    #[must_use]
    pub fn options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    /// Set where outcomes are reported.
    #[must_use]
    pub fn router(mut self, router: OutcomeRouter) -> Self {
        self.router = router;
        self
    }

    /// Set default tags.
    #[must_use]
    pub fn point_settings(mut self, point_settings: PointSettings) -> Self {
        self.point_settings = point_settings;
        self
    }

    /// Replace the line protocol encoder, e.g. to inject a date helper.
    #[must_use]
    pub fn encoder(mut self, encoder: LineProtocolEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Validate the options and start the worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<WriteApi> {
        self.options.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("WriteApi must be created inside a Tokio runtime"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            rx,
            window: BatchWindow::new(self.options.batch_size, self.options.flush_interval),
            dispatcher: Dispatcher::new(
                self.transport,
                RetryStrategy::from_options(&self.options),
                Arc::new(self.router),
                self.options.max_concurrency,
            ),
        };

        debug!(
            batch_size = self.options.batch_size,
            flush_interval_ms = self.options.flush_interval.as_millis() as u64,
            max_concurrency = self.options.max_concurrency,
            "Starting write worker",
        );

        Ok(WriteApi {
            tx,
            records: RecordEncoder {
                encoder: self.encoder,
                default_tags: self.point_settings.resolve(),
            },
            worker: Some(runtime.spawn(worker.run())),
        })
    }
}

/// Batching, non-blocking write API.
///
/// Dropping the API without calling [`close`](Self::close) lets the worker
/// finish pending batches in the background.
pub struct WriteApi {
    tx: mpsc::UnboundedSender<Command>,
    records: RecordEncoder,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WriteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteApi")
            .field("default_tags", &self.records.default_tags)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl WriteApi {
    /// Builder for an API delivering through `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> WriteApiBuilder {
        WriteApiBuilder::new(transport)
    }

    /// Queue one record.
    ///
    /// Returns once the record is encoded and queued; delivery results go to
    /// the router. Fails only with [`Error::Encoding`] or [`Error::Closed`].
    pub fn submit(
        &self,
        bucket: &str,
        org: &str,
        record: impl Into<Record>,
        precision: WritePrecision,
    ) -> Result<()> {
        if let Some((key, line)) = self.records.encode(bucket, org, record.into(), precision)? {
            self.send(key, line)?;
        }
        Ok(())
    }

    /// Queue several records.
    ///
    /// All records are encoded before any is queued, so an encoding error
    /// queues nothing.
    pub fn submit_all<I, R>(&self, bucket: &str, org: &str, records: I, precision: WritePrecision) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: Into<Record>,
    {
        for (key, line) in self.records.encode_all(bucket, org, records, precision)? {
            self.send(key, line)?;
        }
        Ok(())
    }

    /// Queue records from a stream as they arrive.
    ///
    /// Each item is encoded and queued before the next one is polled, so a
    /// slow source fills windows over time. Stops at the first encoding
    /// error; items before it stay queued.
    pub async fn submit_stream<S, R>(&self, bucket: &str, org: &str, records: S, precision: WritePrecision) -> Result<()>
    where
        S: Stream<Item = R>,
        R: Into<Record>,
    {
        let mut records = std::pin::pin!(records);
        let mut count = 0usize;
        while let Some(record) = records.next().await {
            self.submit(bucket, org, record, precision)?;
            count += 1;
        }
        debug!(bucket, org, records = count, "Record stream finished");
        Ok(())
    }

    fn send(&self, key: DestinationKey, line: String) -> Result<()> {
        self.tx
            .send(Command::Write { key, line })
            .map_err(|_| Error::Closed)
    }

    /// Close the current window now.
    ///
    /// Resolves once everything submitted before the call has been handed to
    /// the dispatcher. It does not wait for delivery.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx.send(Command::Flush(ack)).map_err(|_| Error::Closed)?;
        done.await.map_err(|_| Error::Closed)
    }

    /// Flush, wait for every batch to finish and stop the worker.
    ///
    /// With a `timeout`, batches still pending or in flight when it expires
    /// are abandoned, reported to `on_error` with [`Error::ShutdownTimeout`],
    /// and the same error is returned.
    pub async fn close(mut self, timeout: Option<Duration>) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Close {
                timeout,
                done: done_tx,
            })
            .map_err(|_| Error::Closed)?;

        let abandoned = done_rx.await.map_err(|_| Error::Closed)?;
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "Write worker ended abnormally");
            }
        }

        match (abandoned, timeout) {
            (0, _) => Ok(()),
            (_, Some(timeout)) => Err(Error::ShutdownTimeout(timeout)),
            (_, None) => Ok(()),
        }
    }
}

/// Background task owning the window and the dispatcher.
struct Worker {
    rx: mpsc::UnboundedReceiver<Command>,
    window: BatchWindow,
    dispatcher: Dispatcher,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let deadline = self.window.deadline();
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Write { key, line }) => {
                        if let Some(batches) = self.window.push(key, line) {
                            self.dispatcher.enqueue(batches);
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        self.close_window();
                        let _ = ack.send(());
                    }
                    Some(Command::Close { timeout, done }) => {
                        let abandoned = self.shutdown(timeout).await;
                        let _ = done.send(abandoned);
                        return;
                    }
                    None => {
                        debug!("Write API dropped, draining remaining batches");
                        self.shutdown(None).await;
                        return;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => self.close_window(),
                _ = self.dispatcher.complete_next(), if self.dispatcher.has_in_flight() => {}
            }
        }
    }

    fn close_window(&mut self) {
        let batches = self.window.close();
        if !batches.is_empty() {
            self.dispatcher.enqueue(batches);
        }
    }

    /// Flush and wait. Returns the number of abandoned batches.
    async fn shutdown(&mut self, timeout: Option<Duration>) -> usize {
        self.close_window();

        let abandoned = match timeout {
            None => {
                self.dispatcher.drain().await;
                0
            }
            Some(limit) => match tokio::time::timeout(limit, self.dispatcher.drain()).await {
                Ok(()) => 0,
                Err(_) => self.dispatcher.abandon(|| Error::ShutdownTimeout(limit)),
            },
        };

        if abandoned > 0 {
            warn!(abandoned, "Write API closed before all batches were delivered");
        } else {
            info!("Write API closed");
        }
        abandoned
    }
}

/// Write API that delivers on every call.
///
/// Each call groups its records by destination and sends one request per
/// group, retrying transient failures. The first terminal failure is
/// returned.
#[derive(Clone)]
pub struct SyncWriteApi {
    transport: Arc<dyn Transport>,
    strategy: RetryStrategy,
    records: RecordEncoder,
}

impl std::fmt::Debug for SyncWriteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWriteApi")
            .field("strategy", &self.strategy)
            .field("default_tags", &self.records.default_tags)
            .finish()
    }
}

impl SyncWriteApi {
    /// Create an API delivering through `transport`.
    pub fn new(transport: Arc<dyn Transport>, options: WriteOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            transport,
            strategy: RetryStrategy::from_options(&options),
            records: RecordEncoder::default(),
        })
    }

    /// Set default tags.
    #[must_use]
    pub fn with_point_settings(mut self, point_settings: PointSettings) -> Self {
        self.records.default_tags = point_settings.resolve();
        self
    }

    /// Replace the line protocol encoder.
    #[must_use]
    pub fn with_encoder(mut self, encoder: LineProtocolEncoder) -> Self {
        self.records.encoder = encoder;
        self
    }

    /// Write one record.
    pub async fn write(
        &self,
        bucket: &str,
        org: &str,
        record: impl Into<Record>,
        precision: WritePrecision,
    ) -> Result<()> {
        self.write_all(bucket, org, std::iter::once(record.into()), precision).await
    }

    /// Write several records, one request per destination key.
    pub async fn write_all<I, R>(&self, bucket: &str, org: &str, records: I, precision: WritePrecision) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: Into<Record>,
    {
        let lines = self.records.encode_all(bucket, org, records, precision)?;
        for batch in group_by_key(lines) {
            debug!(
                bucket = %batch.key().bucket,
                org = %batch.key().org,
                precision = %batch.key().precision,
                lines = batch.len(),
                "Writing batch",
            );
            deliver(self.transport.as_ref(), &self.strategy, &batch, |_| {}).await?;
        }
        Ok(())
    }
}
