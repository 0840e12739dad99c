//! # influxdb-write
//!
//! Batching, retrying async write client for InfluxDB 2.x.
//!
//! ## Why?
//!
//! Writing one HTTP request per point does not scale, and a write that fails
//! because the server is busy should not take the caller down with it:
//!
//! ```ignore
//! // One request per point, and every 503 is the caller's problem
//! for point in points {
//!     client.write(bucket, org, point).await?;
//! }
//! ```
//!
//! `influxdb-write` collects points into batches per destination, sends them
//! in the background and retries transient failures with exponential backoff:
//!
//! ```ignore
//! for point in points {
//!     write_api.submit(bucket, org, point, WritePrecision::Ns)?;
//! }
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use influxdb_write::{Client, OutcomeRouter, Point, WriteOptions, WritePrecision};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("http://localhost:8086", "my-org", "my-token")?;
//!
//!     let write_api = client
//!         .write_api_builder()
//!         .options(WriteOptions::default().with_batch_size(500))
//!         .router(OutcomeRouter::new().on_error(|key, _payload, error| {
//!             eprintln!("write to {key} failed: {error}");
//!         }))
//!         .build()?;
//!
//!     for i in 0..10_000 {
//!         let point = Point::measurement("temperature")
//!             .tag("sensor", format!("s{}", i % 10))
//!             .field("value", 20.0 + (i % 7) as f64);
//!         write_api.submit("sensors", "my-org", point, WritePrecision::Ns)?;
//!     }
//!
//!     write_api.close(Some(Duration::from_secs(30))).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Batching**: windows close on `batch_size` lines or `flush_interval`,
//!   whichever comes first, and are split into one request per
//!   bucket/org/precision
//! - **Streams**: [`WriteApi::submit_stream`] queues records from any
//!   `futures::Stream` as they arrive
//! - **Retries**: 429, 5xx and network errors are retried with jittered
//!   exponential backoff, honoring `Retry-After`
//! - **Outcome reporting**: success, retry and error callbacks, or a channel
//! - **Synchronous mode**: [`SyncWriteApi`] returns errors to the caller
//! - **Pluggable transport**: anything implementing [`Transport`] can stand in
//!   for the HTTP client

pub mod batch;
pub mod client;
pub mod date;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod options;
pub mod outcome;
pub mod parser;
pub mod point;
pub mod retry;
pub mod types;
pub mod value;
pub mod write;

// Re-export main types at crate root
pub use batch::Batch;
pub use client::Client;
pub use date::{ChronoDateHelper, DateHelper, Timestamp};
pub use dispatch::Transport;
pub use encoder::LineProtocolEncoder;
pub use error::{Error, Result};
pub use options::{PointSettings, WriteOptions};
pub use outcome::{Outcome, OutcomeKind, OutcomeRouter};
pub use point::{Point, Record};
pub use retry::{DeliveryFailure, JitterRng};
pub use types::{DestinationKey, WritePrecision};
pub use value::FieldValue;
pub use write::{SyncWriteApi, WriteApi, WriteApiBuilder};

// Re-export parser for verifying encoded output
pub use parser::{ParsedLine, parse_line};
