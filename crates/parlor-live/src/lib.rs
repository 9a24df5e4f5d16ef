//! Live relay measurement source.
//!
//! The relay exposes the measurement store over HTTP:
//!
//! ```text
//! GET <base>/api/live
//! {"status":"active","measurements":[{"runId":1,"entityId":23,"tag":"TR023","pulses":45,"startedAt":"..."}]}
//! {"status":"idle","measurements":[]}
//! ```
//!
//! Each response is one complete poll snapshot. An `idle` status is an empty
//! parlor, not an outage; transport failures and non-2xx answers are
//! reported as [`LiveError`] so the caller can mark the source unavailable.
//! Measurements are decoded one at a time: an entry the relay got wrong is
//! skipped without losing the rest of the snapshot.

use std::time::Duration;

use parlor_core::RawOpenRun;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Default request timeout for relay calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const LIVE_PATH: &str = "/api/live";

/// Relay client errors.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The configured base URL was unusable.
    #[error("invalid relay URL: {reason}")]
    InvalidUrl { reason: &'static str },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The relay answered with an error status.
    #[error("relay error (status {status}): {message}")]
    Relay { status: u16, message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Whether the relay saw any open runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Idle,
    Active,
}

/// Decoded relay response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSnapshot {
    pub status: LiveStatus,
    pub measurements: Vec<RawOpenRun>,
    /// Entries that could not be decoded at all, such as one without a
    /// numeric `runId`.
    pub skipped: usize,
}

#[derive(Deserialize)]
struct LiveResponse {
    status: LiveStatus,
    #[serde(default)]
    measurements: Option<Vec<serde_json::Value>>,
}

impl LiveSnapshot {
    /// The open runs to reconcile. Always empty for an idle relay.
    pub fn into_runs(self) -> Vec<RawOpenRun> {
        match self.status {
            LiveStatus::Idle => Vec::new(),
            LiveStatus::Active => self.measurements,
        }
    }
}

/// Live relay client.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    url: String,
}

impl Client {
    /// Creates a client for the relay at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LiveError> {
        let base = base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(LiveError::InvalidUrl {
                reason: "URL cannot be empty",
            });
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(LiveError::InvalidUrl {
                reason: "URL must start with http:// or https://",
            });
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LiveError::ClientBuild)?;

        Ok(Self {
            http,
            url: format!("{base}{LIVE_PATH}"),
        })
    }

    /// The full endpoint being polled.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches the current set of open runs.
    pub async fn fetch(&self) -> Result<Vec<RawOpenRun>, LiveError> {
        let response = self.http.get(&self.url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LiveError::Relay {
                status: status.as_u16(),
                message: parse_relay_error(&body).unwrap_or(body),
            });
        }

        let snapshot = parse_live_response(&body)?;
        debug!(
            status = ?snapshot.status,
            open = snapshot.measurements.len(),
            skipped = snapshot.skipped,
            "relay snapshot"
        );
        Ok(snapshot.into_runs())
    }
}

/// Decodes a relay response body.
///
/// Only an unreadable envelope is an error. Each measurement is decoded on
/// its own; entries that fail are logged and counted in
/// [`LiveSnapshot::skipped`].
pub fn parse_live_response(body: &str) -> Result<LiveSnapshot, LiveError> {
    let response: LiveResponse =
        serde_json::from_str(body).map_err(|err| LiveError::InvalidResponse(err.to_string()))?;

    let entries = response.measurements.unwrap_or_default();
    let mut measurements = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<RawOpenRun>(entry) {
            Ok(run) => measurements.push(run),
            Err(err) => {
                warn!(index, error = %err, "skipping undecodable relay measurement");
                skipped += 1;
            }
        }
    }

    Ok(LiveSnapshot {
        status: response.status,
        measurements,
        skipped,
    })
}

fn parse_relay_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        error: String,
        #[serde(default)]
        message: Option<String>,
    }

    serde_json::from_str::<ErrorPayload>(body)
        .ok()
        .map(|payload| match payload.message {
            Some(message) => format!("{}: {message}", payload.error),
            None => payload.error,
        })
}
