//! Timestamps and the date conversion strategy used by the encoder.
//!
//! The encoder never parses or converts dates itself. It asks a
//! [`DateHelper`] for nanoseconds since the unix epoch, so a caller that needs
//! a different parser or default time zone injects its own helper instead of
//! patching global state.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::types::WritePrecision;

/// Time attached to a point.
#[derive(Clone, Debug, PartialEq)]
pub enum Timestamp {
    /// Integer timestamp, already expressed in the point's precision.
    /// Written verbatim.
    Epoch(i64),
    /// An instant with a known offset.
    DateTime(DateTime<FixedOffset>),
    /// A wall-clock time without offset; the helper's default zone applies.
    Naive(NaiveDateTime),
    /// Offset from the unix epoch.
    SinceEpoch(chrono::Duration),
    /// A date string, parsed by the helper at encoding time.
    Text(String),
}

impl From<i64> for Timestamp {
    fn from(v: i64) -> Self {
        Timestamp::Epoch(v)
    }
}

impl From<i32> for Timestamp {
    fn from(v: i32) -> Self {
        Timestamp::Epoch(i64::from(v))
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Timestamp {
    fn from(v: DateTime<Tz>) -> Self {
        Timestamp::DateTime(v.fixed_offset())
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(v: NaiveDateTime) -> Self {
        Timestamp::Naive(v)
    }
}

impl From<chrono::Duration> for Timestamp {
    fn from(v: chrono::Duration) -> Self {
        Timestamp::SinceEpoch(v)
    }
}

impl From<&str> for Timestamp {
    fn from(v: &str) -> Self {
        Timestamp::Text(v.to_string())
    }
}

impl From<String> for Timestamp {
    fn from(v: String) -> Self {
        Timestamp::Text(v)
    }
}

/// Date parsing and conversion strategy.
pub trait DateHelper: Send + Sync + fmt::Debug {
    /// Parse a date string into an instant.
    fn parse_date(&self, input: &str) -> Result<DateTime<FixedOffset>>;

    /// Attach the default zone to a wall-clock time.
    fn localize(&self, naive: &NaiveDateTime) -> Result<DateTime<FixedOffset>>;

    /// Integer timestamp for `ts` in `precision` units, truncated toward
    /// zero.
    ///
    /// [`Timestamp::Epoch`] values are returned unchanged. Instants outside
    /// the `i64` nanosecond range are still valid at coarser precisions.
    fn to_precision(&self, ts: &Timestamp, precision: WritePrecision) -> Result<i64> {
        let nanos = match ts {
            Timestamp::Epoch(v) => return Ok(*v),
            Timestamp::SinceEpoch(d) => {
                i128::from(d.num_seconds()) * NANOS_PER_SEC + i128::from(d.subsec_nanos())
            }
            Timestamp::DateTime(dt) => instant_nanos(dt),
            Timestamp::Naive(naive) => instant_nanos(&self.localize(naive)?),
            Timestamp::Text(s) => instant_nanos(&self.parse_date(s)?),
        };

        i64::try_from(nanos / i128::from(precision.nanos_per_unit())).map_err(|_| {
            Error::encoding(format!("timestamp {ts:?} is out of range for precision {precision}"))
        })
    }

    /// Nanoseconds since the unix epoch for `ts`.
    ///
    /// [`Timestamp::Epoch`] values are returned unchanged.
    fn to_nanoseconds(&self, ts: &Timestamp) -> Result<i64> {
        self.to_precision(ts, WritePrecision::Ns)
    }
}

const NANOS_PER_SEC: i128 = 1_000_000_000;

fn instant_nanos(instant: &DateTime<FixedOffset>) -> i128 {
    i128::from(instant.timestamp()) * NANOS_PER_SEC + i128::from(instant.timestamp_subsec_nanos())
}

/// [`DateHelper`] backed by chrono.
///
/// Accepts RFC 3339 strings and, without an offset, `YYYY-MM-DDTHH:MM:SS[.f]`,
/// `YYYY-MM-DD HH:MM:SS[.f]` or a bare `YYYY-MM-DD`, which are read in the
/// helper's default zone.
#[derive(Clone, Debug)]
pub struct ChronoDateHelper {
    timezone: FixedOffset,
}

impl ChronoDateHelper {
    /// Helper whose default zone is `timezone`.
    pub fn new(timezone: FixedOffset) -> Self {
        Self { timezone }
    }

    /// Default zone used for naive date-times.
    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }
}

impl Default for ChronoDateHelper {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

impl DateHelper for ChronoDateHelper {
    fn parse_date(&self, input: &str) -> Result<DateTime<FixedOffset>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Ok(dt);
        }

        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
                return self.localize(&naive);
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return self.localize(&naive);
            }
        }

        Err(Error::encoding(format!("invalid timestamp '{input}'")))
    }

    fn localize(&self, naive: &NaiveDateTime) -> Result<DateTime<FixedOffset>> {
        self.timezone
            .from_local_datetime(naive)
            .single()
            .ok_or_else(|| Error::encoding(format!("ambiguous local time {naive}")))
    }
}
