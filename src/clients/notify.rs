use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Fire-and-forget notifications. Failures are logged, never retried, and
/// never fail the calling workflow transition.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send(&self, to: &str, template: &str, vars: &Value) -> bool;
}

pub struct HttpNotifier {
    client: Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, to: &str, template: &str, vars: &Value) -> bool {
        let result = self
            .client
            .post(format!("{}/send", self.endpoint))
            .json(&json!({"to": to, "template": template, "vars": vars}))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(to, template, status = %response.status(), "notification rejected");
                false
            }
            Err(err) => {
                warn!(to, template, error = %err, "notification delivery failed");
                false
            }
        }
    }
}

/// Used when no notification endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, template: &str, _vars: &Value) -> bool {
        info!(to, template, "notification suppressed (no endpoint configured)");
        true
    }
}
