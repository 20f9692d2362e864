//! JSON-over-HTTP helper shared by the embedding and generation providers.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 0.5s, 1s, 2s, 4s, 8s, 16s (capped at 2^5)

use std::time::Duration;

use serde_json::Value;

use crate::error::{AssistantError, Result};

/// Build a client with a per-request timeout.
pub(crate) fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AssistantError::Other(e.into()))
}

/// Read an API key from the named environment variable, if set and non-empty.
pub(crate) fn api_key_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

/// A JSON POST target with retry settings.
pub(crate) struct JsonEndpoint<'a> {
    pub provider: &'a str,
    pub url: String,
    pub api_key: Option<&'a str>,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl JsonEndpoint<'_> {
    /// POST `body` and return the parsed JSON response.
    pub(crate) async fn post(&self, client: &reqwest::Client, body: &Value) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(key) = self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| {
                            AssistantError::provider(
                                self.provider,
                                format!("invalid JSON response: {}", e),
                            )
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = AssistantError::provider(
                        self.provider,
                        format!("API error {}: {}", status, body_text),
                    );

                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(
                            provider = self.provider,
                            attempt,
                            %status,
                            "retryable provider error"
                        );
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) if e.is_timeout() => {
                    last_err = Some(AssistantError::Timeout {
                        operation: format!("{} request", self.provider),
                        secs: self.timeout_secs,
                    });
                }
                Err(e) => {
                    last_err = Some(AssistantError::provider(
                        self.provider,
                        format!("connection error (is it running at {}?): {}", self.url, e),
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            AssistantError::provider(self.provider, "request failed after retries")
        }))
    }
}
