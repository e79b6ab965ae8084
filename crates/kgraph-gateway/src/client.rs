//! Shared JSON-over-HTTP client with bounded retries.

use std::time::Duration;

use kgraph_core::{Error, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Why a service call gave up. Gateways wrap it into their own error variant.
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub message: String,
    pub retryable: bool,
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// POSTs JSON to one service, retrying transient failures with exponential backoff.
#[derive(Clone)]
pub struct ServiceClient {
    http: Client,
    base_url: String,
    max_attempts: u32,
    backoff: Duration,
}

impl ServiceClient {
    pub fn new(base_url: &str, timeout: Duration, max_attempts: u32, backoff: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client for {}: {}", base_url, e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts: max_attempts.max(1),
            backoff,
        })
    }

    /// POST and return the successful response.
    ///
    /// Connection errors, timeouts, 5xx, 408 and 429 are retried; other
    /// statuses fail immediately.
    pub async fn post<B>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> std::result::Result<Response, CallFailure>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 1u32;

        loop {
            debug!("POST {} (attempt {}/{})", url, attempt, self.max_attempts);
            let failure = match self.http.post(&url).query(query).json(body).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    CallFailure {
                        message: format!("{} returned {}: {}", url, status, truncate(&text, 200)),
                        retryable: is_transient(status),
                    }
                }
                Err(e) => CallFailure {
                    message: format!("{} request failed: {}", url, e),
                    retryable: true,
                },
            };

            if !failure.retryable || attempt >= self.max_attempts {
                return Err(failure);
            }

            let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
            warn!(
                "Retrying {} in {}ms after attempt {} failed: {}",
                url,
                delay.as_millis(),
                attempt,
                failure
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// POST and decode a JSON response body.
    pub async fn post_json<B, R>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> std::result::Result<R, CallFailure>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.post(path, query, body).await?;
        response.json::<R>().await.map_err(|e| CallFailure {
            message: format!("{}{} returned an unreadable body: {}", self.base_url, path, e),
            retryable: false,
        })
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
