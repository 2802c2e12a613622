//! Retry with exponential backoff for outbound requests.
//!
//! Only transient failures are retried: 5xx responses and transport-level
//! errors (connect, timeout, reset while reading the body). Anything else is
//! returned on the first attempt.

use super::TransportError;
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;

/// Attempt budget and backoff for one request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Total attempts, first try included.
    pub attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
}

impl RetryPolicy {
    fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// A failed attempt, tagged with whether another attempt may succeed.
#[derive(Debug)]
pub(crate) struct Failure {
    pub error: TransportError,
    pub transient: bool,
}

/// Map a non-success status to a failure.
pub(crate) fn check_status(url: &str, response: Response, attempt: u32) -> Result<Response, Failure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(Failure {
        error: TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            attempts: attempt,
        },
        transient: is_transient_status(status),
    })
}

/// Map a reqwest error to a failure.
pub(crate) fn classify_error(url: &str, e: &reqwest::Error, attempt: u32) -> Failure {
    let transient = e.is_connect() || e.is_timeout() || e.is_request() || e.is_body();
    Failure {
        error: TransportError::Connection {
            url: url.to_string(),
            attempts: attempt,
            reason: e.to_string(),
        },
        transient,
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Run `op` until it succeeds, fails permanently, or the budget runs out.
///
/// `op` receives the 1-based attempt number so the error it builds can
/// report how many attempts were made.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    url: &str,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(failure) if !failure.transient || attempt >= policy.attempts => {
                return Err(failure.error);
            }
            Err(failure) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    url,
                    attempt,
                    max_attempts = policy.attempts,
                    "request failed, retrying in {delay:?}: {}",
                    failure.error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
