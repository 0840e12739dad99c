//! Error types for influxdb-write.

use std::time::Duration;

use thiserror::Error;

/// Error type for influxdb-write operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The HTTP client could not be initialized.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Options could not be read from JSON.
    #[error("Invalid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record could not be encoded into line protocol.
    ///
    /// Raised synchronously; the record never reaches the write pipeline.
    #[error("Encoding error: {message}")]
    Encoding {
        /// Description of what could not be encoded.
        message: String,
    },

    /// Failed to parse a line of line protocol.
    #[error("Failed to parse line protocol: {message}")]
    Parse {
        /// Description of what failed to parse.
        message: String,
    },

    /// A delivery attempt failed with a condition worth retrying
    /// (throttling, unavailability or a network error).
    #[error("Transient write failure{}: {message}", status_suffix(.status))]
    TransientDelivery {
        /// HTTP status, absent for network-level failures.
        status: Option<u16>,
        /// Server or transport message.
        message: String,
        /// Server-requested delay, if any.
        retry_after: Option<Duration>,
    },

    /// A delivery attempt was rejected and will not be retried.
    #[error("Write rejected (HTTP {status}): {message}")]
    PermanentDelivery {
        /// HTTP status returned by the server.
        status: u16,
        /// Server message.
        message: String,
    },

    /// The retry budget was used up.
    #[error("Write failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// Number of delivery attempts made.
        attempts: u32,
        /// Which guard fired.
        reason: String,
        /// The last failure observed.
        #[source]
        source: Box<Error>,
    },

    /// A batch was abandoned because shutdown timed out.
    #[error("Write abandoned: shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// A delivery task panicked or was cancelled.
    #[error("Delivery task failed: {0}")]
    TaskFailed(String),

    /// The write pipeline is no longer running.
    #[error("Write pipeline is closed")]
    Closed,

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl Error {
    pub(crate) fn encoding(message: impl Into<String>) -> Self {
        Error::Encoding {
            message: message.into(),
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Returns true for errors raised locally before any network interaction.
    pub fn is_encoding(&self) -> bool {
        matches!(self, Error::Encoding { .. })
    }

    /// HTTP status associated with this error, looking through
    /// [`Error::RetriesExhausted`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::TransientDelivery { status, .. } => *status,
            Error::PermanentDelivery { status, .. } => Some(*status),
            Error::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Result type alias for influxdb-write operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_library_errors() {
        let request = reqwest::Client::new().get("not a url").build().unwrap_err();
        let e = Error::from(request);
        assert!(matches!(e, Error::Http(_)));
        assert_eq!(e.status(), None);

        let json = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        assert!(Error::from(json).to_string().starts_with("Invalid JSON"));
    }

    #[test]
    fn test_display_transient() {
        let e = Error::TransientDelivery {
            status: Some(429),
            message: "slow down".to_string(),
            retry_after: None,
        };
        assert_eq!(e.to_string(), "Transient write failure (HTTP 429): slow down");

        let e = Error::TransientDelivery {
            status: None,
            message: "connection refused".to_string(),
            retry_after: None,
        };
        assert_eq!(e.to_string(), "Transient write failure: connection refused");
    }

    #[test]
    fn test_status_through_exhausted() {
        let e = Error::RetriesExhausted {
            attempts: 3,
            reason: "too many error responses".to_string(),
            source: Box::new(Error::TransientDelivery {
                status: Some(503),
                message: "unavailable".to_string(),
                retry_after: None,
            }),
        };
        assert_eq!(e.status(), Some(503));
        assert!(!e.is_encoding());
        assert!(Error::encoding("bad").is_encoding());
    }
}
