//! Readiness polling for freshly started containers

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("No 2xx answer from {url} within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Poll `url` until it answers with a 2xx status or `timeout` elapses.
///
/// Connection failures and non-2xx answers are expected while the application
/// boots and only cause another attempt.
pub async fn wait_for_http_server_2xx(url: &str, timeout: Duration) -> Result<(), ReadinessError> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(url = %url, attempts, "Server is ready");
                return Ok(());
            }
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "Server not ready yet");
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Server not reachable yet");
            }
        }

        if Instant::now() + POLL_INTERVAL > deadline {
            return Err(ReadinessError::Timeout {
                url: url.to_string(),
                timeout,
            });
        }
        sleep(POLL_INTERVAL).await;
    }
}
