//! InfluxDB HTTP client.
//!
//! [`Client`] holds the server URL, credentials and a `reqwest::Client`, and
//! implements [`Transport`] by posting line protocol to `/api/v2/write`. It
//! is also the usual entry point for creating write APIs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, LOCATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, Url};
use serde::Deserialize;
use tracing::trace;

use crate::dispatch::Transport;
use crate::error::{Error, Result};
use crate::options::WriteOptions;
use crate::retry::DeliveryFailure;
use crate::types::DestinationKey;
use crate::write::{SyncWriteApi, WriteApi, WriteApiBuilder};

const USER_AGENT_VALUE: &str = concat!("influxdb-write/", env!("CARGO_PKG_VERSION"));

/// InfluxDB 2.x client.
///
/// # Example
///
/// ```ignore
/// use influxdb_write::{Client, Point, WriteOptions, WritePrecision};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new("http://localhost:8086", "my-org", "my-token")?;
///
///     let write_api = client.sync_write_api(WriteOptions::default())?;
///     write_api
///         .write(
///             "sensors",
///             client.org(),
///             Point::measurement("temperature").field("value", 21.5),
///             WritePrecision::Ns,
///         )
///         .await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    org: String,
    token: String,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("org", &self.org)
            .finish_non_exhaustive()
    }
}

/// Error body returned by the write endpoint.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl Client {
    /// Create a new InfluxDB client.
    ///
    /// # Arguments
    ///
    /// * `url` - Base URL of the InfluxDB server (e.g., "http://localhost:8086")
    /// * `org` - Organization name
    /// * `token` - Authentication token
    ///
    /// Fails with [`Error::Http`] if the HTTP client cannot be initialized
    /// and with [`Error::Config`] for an invalid URL.
    pub fn new(url: impl Into<String>, org: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Self::with_http_client(http, url, org, token)
    }

    /// Create a new client with a custom reqwest client.
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, redirect
    /// policy, etc.
    pub fn with_http_client(
        http: reqwest::Client,
        url: impl Into<String>,
        org: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let url_str = url.into();
        let base_url = Url::parse(&url_str)
            .map_err(|e| Error::config(format!("Invalid InfluxDB URL '{url_str}': {e}")))?;

        Ok(Self {
            http,
            base_url,
            org: org.into(),
            token: token.into(),
        })
    }

    /// Get the base URL.
    pub fn url(&self) -> &Url {
        &self.base_url
    }

    /// Get the organization name.
    pub fn org(&self) -> &str {
        &self.org
    }

    /// Build the full URL for an API endpoint, keeping any base path.
    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}{path}"));
        url
    }

    /// Batching write API with default outcome handling.
    pub fn write_api(&self, options: WriteOptions) -> Result<WriteApi> {
        self.write_api_builder().options(options).build()
    }

    /// Builder for a batching write API delivering through this client.
    pub fn write_api_builder(&self) -> WriteApiBuilder {
        WriteApi::builder(Arc::new(self.clone()))
    }

    /// Write API that delivers on every call.
    pub fn sync_write_api(&self, options: WriteOptions) -> Result<SyncWriteApi> {
        SyncWriteApi::new(Arc::new(self.clone()), options)
    }

    /// POST one payload to the write endpoint.
    async fn post_write(&self, key: &DestinationKey, payload: &str) -> std::result::Result<(), DeliveryFailure> {
        trace!(bucket = %key.bucket, org = %key.org, bytes = payload.len(), "POST /api/v2/write");

        let response = self
            .http
            .request(Method::POST, self.endpoint("/api/v2/write"))
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .query(&[
                ("org", key.org.as_str()),
                ("bucket", key.bucket.as_str()),
                ("precision", key.precision.as_str()),
            ])
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| DeliveryFailure::network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DeliveryFailure::Redirect {
                status: status.as_u16(),
                location,
            });
        }

        let retry_after = parse_retry_after(response.headers(), Utc::now());
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());

        Err(DeliveryFailure::Status {
            status: status.as_u16(),
            message,
            retry_after,
        })
    }
}

impl Transport for Client {
    fn send<'a>(
        &'a self,
        key: &'a DestinationKey,
        payload: &'a str,
    ) -> BoxFuture<'a, std::result::Result<(), DeliveryFailure>> {
        Box::pin(self.post_write(key, payload))
    }
}

/// `Retry-After` as delay-seconds or an HTTP date relative to `now`.
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Server message from a JSON error body, falling back to the raw body.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { message: Some(message) }) => Some(message),
        _ => Some(body.to_string()),
    }
}
