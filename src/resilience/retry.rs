use std::future::Future;

use anyhow::Result;
use http::StatusCode;
use rand::Rng;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::observability::metrics::get_metrics;
use crate::request::retry_after;
use crate::transport::PhysicalResponse;

static REASON_RATE_LIMITED: &str = "rate_limited";
static REASON_SERVER_ERROR: &str = "server_error";

/// Bounded retry of physical sends.
///
/// Transport failures are returned at once. 5xx and 429 responses are retried while
/// attempts remain; the last response is handed back unchanged once they run out.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl RetrySettings {
    pub fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self { attempts: attempts.max(1), base_delay_ms }
    }

    pub fn with_attempts(&self, attempts: u32) -> Self {
        Self::new(attempts, self.base_delay_ms)
    }

    pub async fn run_with_retry<F, Fut>(&self, mut operation: F) -> Result<PhysicalResponse>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PhysicalResponse>>,
    {
        let mut attempts_remaining = self.attempts.max(1);

        loop {
            let response = operation().await?;
            attempts_remaining -= 1;

            let Some(reason) = retry_reason(response.status) else {
                return Ok(response);
            };
            if attempts_remaining == 0 {
                warn!(status = %response.status, attempts = self.attempts, "retries exhausted, returning last response");
                return Ok(response);
            }

            let wait = self.wait_before_retry(&response, attempts_remaining);
            warn!(
                "Attempt {}/{} got {}, retrying in {:?}",
                self.attempts - attempts_remaining,
                self.attempts,
                response.status,
                wait
            );
            get_metrics().await.http_retries.with_label_values(&[reason]).inc();
            sleep(wait).await;
        }
    }

    /// Server-directed pacing wins for 429; otherwise exponential backoff with jitter.
    fn wait_before_retry(&self, response: &PhysicalResponse, attempts_remaining: u32) -> Duration {
        if response.status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(wait) = retry_after(&response.headers) {
                debug!(?wait, "honoring Retry-After");
                return wait;
            }
        }
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        self.backoff(attempts_remaining, jitter)
    }

    /// `2^(attempts - attempts_remaining) * jitter * base_delay`.
    pub fn backoff(&self, attempts_remaining: u32, jitter: f64) -> Duration {
        let exponent = self.attempts.saturating_sub(attempts_remaining);
        let factor = 2f64.powi(exponent as i32) * jitter;
        Duration::from_secs_f64(factor * self.base_delay_ms as f64 / 1000.0)
    }
}

pub fn is_retryable(status: StatusCode) -> bool {
    retry_reason(status).is_some()
}

fn retry_reason(status: StatusCode) -> Option<&'static str> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(REASON_RATE_LIMITED)
    } else if status.is_server_error() {
        Some(REASON_SERVER_ERROR)
    } else {
        None
    }
}
