use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::genai::error::GenAiError;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryConfig {
    pub timeout_secs: Option<u64>,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug)]
pub(crate) enum RequestFailure {
    Request(reqwest::Error),
    Api { status: StatusCode, body: String },
}

impl From<RequestFailure> for GenAiError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Request(source) => GenAiError::Request(source),
            RequestFailure::Api { status, body } => GenAiError::Api { status, body },
        }
    }
}

/// Sends the request built by `build`, rebuilding it for every retry.
pub(crate) async fn send_with_retry<F>(
    build: F,
    config: RetryConfig,
) -> Result<reqwest::Response, RequestFailure>
where
    F: Fn() -> RequestBuilder,
{
    let max_attempts = config.retries.saturating_add(1);
    let mut attempt = 0;

    loop {
        let mut request = build();

        if let Some(timeout_secs) = config.timeout_secs {
            request = request.timeout(Duration::from_secs(timeout_secs));
        }

        match request.send().await {
            Ok(response) => {
                if response.status().is_success() {
                    return Ok(response);
                }

                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let can_retry = is_retryable_status(status) && attempt + 1 < max_attempts;

                if can_retry {
                    let delay = retry_delay(attempt, config.retry_delay_ms);
                    warn!(%status, attempt, delay_ms = delay.as_millis() as u64, "retrying gemini request");
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                debug!(%status, "gemini request failed");
                return Err(RequestFailure::Api { status, body });
            }
            Err(source) => {
                let can_retry = is_retryable_request_error(&source) && attempt + 1 < max_attempts;

                if can_retry {
                    let delay = retry_delay(attempt, config.retry_delay_ms);
                    warn!(error = %source, attempt, "retrying gemini request");
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                return Err(RequestFailure::Request(source));
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_request_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn retry_delay(attempt: u32, base_ms: u64) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(factor).min(30_000);
    Duration::from_millis(delay_ms)
}
