use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::timeout;

use crate::models::ExtractionPayload;

/// Black-box AI summarization: extraction payload in, summary document
/// out. Bounded by a timeout, never retried (a summary can simply be
/// requested again).
#[async_trait]
pub trait Summarizer: Send + Sync + 'static {
    async fn summarize(&self, extraction: &ExtractionPayload) -> Result<Value>;
}

pub struct HttpSummarizer {
    client: Client,
    endpoint: String,
    call_timeout: Duration,
}

impl HttpSummarizer {
    pub fn new(client: Client, endpoint: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            call_timeout,
        }
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, extraction: &ExtractionPayload) -> Result<Value> {
        let request = self
            .client
            .post(format!("{}/summarize", self.endpoint))
            .json(extraction);

        let response = timeout(self.call_timeout, request.send())
            .await
            .map_err(|_| anyhow!("summarizer timed out after {}s", self.call_timeout.as_secs()))?
            .context("summarizer request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("summarizer returned {status}"));
        }

        response
            .json::<Value>()
            .await
            .context("summarizer returned an unreadable body")
    }
}
