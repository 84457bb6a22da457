use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::models::ExtractionPayload;

/// The external document-intelligence / OCR collaborator. Unreliable by
/// contract: calls may fail or hang, so everything above this trait goes
/// through `extract_with_retry`.
#[async_trait]
pub trait DocumentIntelligence: Send + Sync + 'static {
    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<ExtractionPayload>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub max_wait: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(250);
        let wait = base.saturating_mul(2u32.saturating_pow(attempt));
        wait.min(self.max_wait)
    }
}

/// Call the collaborator with a per-attempt timeout and exponential
/// backoff between attempts. Returns the last error once retries are
/// exhausted; the caller transitions the document to `failed`.
pub async fn extract_with_retry(
    service: &dyn DocumentIntelligence,
    policy: RetryPolicy,
    bytes: &[u8],
    content_type: &str,
) -> Result<ExtractionPayload> {
    let mut last_error = anyhow!("extraction never attempted");
    for attempt in 0..=policy.max_retries {
        match timeout(policy.attempt_timeout, service.extract(bytes, content_type)).await {
            Ok(Ok(payload)) => return Ok(payload),
            Ok(Err(err)) => {
                warn!(attempt, error = %err, "document intelligence call failed");
                last_error = err;
            }
            Err(_) => {
                warn!(attempt, "document intelligence call timed out");
                last_error = anyhow!(
                    "extraction timed out after {}s",
                    policy.attempt_timeout.as_secs()
                );
            }
        }
        if attempt < policy.max_retries {
            sleep(policy.backoff(attempt)).await;
        }
    }
    Err(last_error)
}

pub struct HttpDocumentIntelligence {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpDocumentIntelligence {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl DocumentIntelligence for HttpDocumentIntelligence {
    async fn extract(&self, bytes: &[u8], content_type: &str) -> Result<ExtractionPayload> {
        let mut request = self
            .client
            .post(format!("{}/analyze", self.endpoint))
            .header("content-type", content_type.to_string())
            .body(bytes.to_vec());

        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .context("document intelligence request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("document intelligence returned {status}"));
        }

        response
            .json::<ExtractionPayload>()
            .await
            .context("document intelligence returned an unreadable payload")
    }
}
