//! Shared HTTP plumbing for chart sources.
//!
//! Retry strategy:
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - Network error → retry
//! - Any other status → returned to the caller as-is

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;

/// Attempt budget and base delay for one request.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for Retry {
    /// Three attempts, backing off 1s then 2s.
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl Retry {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

/// Build the client a source uses for every request.
pub fn build_client(timeout_secs: u64, accept_invalid_certs: bool) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(accept_invalid_certs)
        .user_agent(concat!("chart-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

/// Send the request produced by `make`, retrying transient failures.
///
/// Returns the first response that is neither 429 nor a server error, so
/// callers can handle 401 and 404 themselves.
pub async fn send_with_retry<F>(retry: &Retry, what: &str, make: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..retry.attempts.max(1) {
        if attempt > 0 {
            let delay = retry.delay(attempt);
            debug!(request = what, attempt, delay_ms = delay.as_millis() as u64, "retrying");
            tokio::time::sleep(delay).await;
        }

        match make().send().await {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} returned {}", what, status));
                    continue;
                }
                return Ok(response);
            }
            Err(e) => {
                last_err = Some(anyhow::Error::new(e).context(format!("requesting {}", what)));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} failed after retries", what)))
}

/// Fail unless `response` is a success, including a snippet of the body.
pub async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    bail!("{} returned {}: {}", what, status, snippet)
}

/// GET `url` with retries and return the body bytes.
pub async fn get_bytes(
    client: &Client,
    retry: &Retry,
    url: &str,
    basic_auth: Option<(&str, Option<&str>)>,
) -> Result<Vec<u8>> {
    let response = send_with_retry(retry, url, || {
        let request = client.get(url);
        match basic_auth {
            Some((user, pass)) => request.basic_auth(user, pass),
            None => request,
        }
    })
    .await?;
    let response = ensure_success(response, url).await?;
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("reading body of {}", url))?;
    Ok(bytes.to_vec())
}
