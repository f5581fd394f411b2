//! HTTP client for Heimdall with bounded-exponential-backoff retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{EventRecordWithTime, HeimdallClient, HeimdallError};
use crate::consensus::bor::span::HeimdallSpan;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(16);

/// Envelope every Heimdall endpoint wraps its payload in.
#[derive(Debug, Deserialize)]
pub struct ResponseWithHeight<T> {
    #[serde(default)]
    pub height: String,
    pub result: T,
}

/// Blocking HTTP client against a Heimdall REST endpoint.
///
/// Transient failures (transport errors, 5xx) are retried with exponential
/// backoff up to a bounded attempt count; 4xx statuses surface immediately.
pub struct HttpHeimdallClient {
    base_url: reqwest::Url,
    client: reqwest::blocking::Client,
    closed: AtomicBool,
    max_attempts: u32,
}

impl HttpHeimdallClient {
    pub fn new(base_url: &str) -> Result<Self, HeimdallError> {
        let base_url = reqwest::Url::parse(base_url).map_err(|e| HeimdallError::Url(e.to_string()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HeimdallError::Url(e.to_string()))?;
        Ok(Self { base_url, client, closed: AtomicBool::new(false), max_attempts: DEFAULT_MAX_ATTEMPTS })
    }

    /// Override the retry budget (minimum one attempt).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Single request against `path`, no retries.
    pub fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ResponseWithHeight<T>, HeimdallError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(HeimdallError::ShutdownDetected);
        }

        let url = self
            .base_url
            .join(path)
            .map_err(|e| HeimdallError::Url(e.to_string()))?;
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| HeimdallError::Unavailable { attempts: 1, reason: e.to_string() })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(HeimdallError::Status { status: status.as_u16() });
        }
        if !status.is_success() {
            return Err(HeimdallError::Unavailable {
                attempts: 1,
                reason: format!("status {}", status.as_u16()),
            });
        }

        response
            .json::<ResponseWithHeight<T>>()
            .map_err(|e| HeimdallError::Decode(e.to_string()))
    }

    /// `fetch` wrapped in the retry policy. Terminal client errors and
    /// shutdown are surfaced as-is; everything else is retried.
    pub fn fetch_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ResponseWithHeight<T>, HeimdallError> {
        let mut delay = BACKOFF_BASE;
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            match self.fetch(path, query) {
                Ok(response) => return Ok(response),
                Err(err @ (HeimdallError::Status { .. } | HeimdallError::ShutdownDetected)) => {
                    return Err(err)
                }
                Err(HeimdallError::Decode(reason)) => return Err(HeimdallError::Decode(reason)),
                Err(HeimdallError::Url(reason)) => return Err(HeimdallError::Url(reason)),
                Err(HeimdallError::Unavailable { reason, .. }) => {
                    tracing::warn!(
                        target: "bor::heimdall",
                        %path,
                        attempt,
                        %reason,
                        "heimdall fetch failed, retrying"
                    );
                    last_reason = reason;
                }
            }

            if attempt < self.max_attempts {
                std::thread::sleep(delay);
                delay = (delay * 2).min(BACKOFF_CAP);
            }
        }

        Err(HeimdallError::Unavailable { attempts: self.max_attempts, reason: last_reason })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl HeimdallClient for HttpHeimdallClient {
    fn span(&self, id: u64) -> Result<HeimdallSpan, HeimdallError> {
        let response: ResponseWithHeight<HeimdallSpan> =
            self.fetch_with_retry(&format!("bor/span/{id}"), &[])?;
        Ok(response.result)
    }

    fn state_sync_events(
        &self,
        from_id: u64,
        to_time: u64,
    ) -> Result<Vec<EventRecordWithTime>, HeimdallError> {
        let query = [("from-id", from_id.to_string()), ("to-time", to_time.to_string())];
        let response: ResponseWithHeight<Vec<EventRecordWithTime>> =
            self.fetch_with_retry("clerk/event-record/list", &query)?;

        let mut events = response.result;
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}
