//! Core types shared by the encoder and the write pipeline.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Precision of the unix timestamps carried in line protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePrecision {
    /// Nanoseconds.
    #[default]
    Ns,
    /// Microseconds.
    Us,
    /// Milliseconds.
    Ms,
    /// Seconds.
    S,
}

impl WritePrecision {
    /// Value of the `precision` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            WritePrecision::Ns => "ns",
            WritePrecision::Us => "us",
            WritePrecision::Ms => "ms",
            WritePrecision::S => "s",
        }
    }

    /// Number of nanoseconds in one unit of this precision.
    pub fn nanos_per_unit(&self) -> i64 {
        match self {
            WritePrecision::Ns => 1,
            WritePrecision::Us => 1_000,
            WritePrecision::Ms => 1_000_000,
            WritePrecision::S => 1_000_000_000,
        }
    }
}

impl FromStr for WritePrecision {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "ns" => Ok(Self::Ns),
            "us" => Ok(Self::Us),
            "ms" => Ok(Self::Ms),
            "s" => Ok(Self::S),
            _ => Err(Error::config(format!("unknown write precision: {input}"))),
        }
    }
}

impl std::fmt::Display for WritePrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a batch is delivered.
///
/// Two lines with equal keys may share one request body regardless of their
/// measurement.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DestinationKey {
    /// Destination bucket.
    pub bucket: String,
    /// Destination organization (name or ID).
    pub org: String,
    /// Timestamp precision of every line in the batch.
    pub precision: WritePrecision,
}

impl DestinationKey {
    /// Create a new key.
    pub fn new(bucket: impl Into<String>, org: impl Into<String>, precision: WritePrecision) -> Self {
        Self {
            bucket: bucket.into(),
            org: org.into(),
            precision,
        }
    }
}

impl std::fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bucket={} org={} precision={}",
            self.bucket, self.org, self.precision
        )
    }
}
