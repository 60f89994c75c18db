//! Retry with exponential backoff, shared by every external call site.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors (connect, timeout, request) → retry
//! - Backoff: base, 2×, 4×, … capped at 32× base

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Non-success HTTP status returned by an upstream service.
#[derive(Debug, thiserror::Error)]
#[error("{service} API error {status}: {body}")]
pub struct HttpStatusError {
    pub service: &'static str,
    pub status: u16,
    pub body: String,
}

/// Whether `err` is worth another attempt.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(http) = err.downcast_ref::<HttpStatusError>() {
        return http.status == 429 || http.status >= 500;
    }
    if let Some(req) = err.downcast_ref::<reqwest::Error>() {
        return req.is_timeout() || req.is_connect() || req.is_request();
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << attempt.saturating_sub(1).min(5))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. Returns the last error in the latter
/// two cases.
pub async fn retry_with_backoff<T, F, Fut, R>(
    policy: &RetryPolicy,
    retryable: R,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&anyhow::Error) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && retryable(&e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    call = label,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// POST a JSON body and return the parsed JSON response.
///
/// Non-success statuses become [`HttpStatusError`] so the retry
/// classifier can tell rate limits from client errors.
pub async fn post_json(
    client: &reqwest::Client,
    service: &'static str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    if let Some(token) = bearer {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(HttpStatusError {
            service,
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    fn status(code: u16) -> anyhow::Error {
        HttpStatusError {
            service: "test",
            status: code,
            body: String::new(),
        }
        .into()
    }

    #[test]
    fn test_classification() {
        assert!(is_retryable(&status(429)));
        assert!(is_retryable(&status(503)));
        assert!(!is_retryable(&status(400)));
        assert!(!is_retryable(&status(401)));
        assert!(!is_retryable(&anyhow!("malformed response")));
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = RetryPolicy::new(10);
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(6), Duration::from_secs(32));
        assert_eq!(p.delay_for(9), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast(3), is_retryable, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(status(503))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry_with_backoff(&fast(5), is_retryable, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(status(401)) }
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast(2), is_retryable, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(status(429)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
