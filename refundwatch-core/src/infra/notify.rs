//! Fire-and-forget notification port.
//!
//! Delivery failures are logged, never propagated: a missed notification
//! must not roll back or fail a status change.

use async_trait::async_trait;
use refundwatch_model::UserId;
use serde_json::json;
use tracing::{info, warn};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: UserId,
        category: &str,
        title: &str,
        body: &str,
    );
}

/// Logs notifications instead of delivering them. Default in development.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        user_id: UserId,
        category: &str,
        title: &str,
        body: &str,
    ) {
        info!(
            user = %user_id,
            category,
            title,
            body,
            "notification (log only)"
        );
    }
}

/// Posts notifications to the platform's notification service webhook.
#[derive(Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        user_id: UserId,
        category: &str,
        title: &str,
        body: &str,
    ) {
        let payload = json!({
            "user_id": user_id,
            "category": category,
            "title": title,
            "body": body,
        });

        match self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(
                    user = %user_id,
                    status = %response.status(),
                    "notification webhook rejected payload"
                );
            }
            Err(err) => {
                warn!(
                    user = %user_id,
                    error = %err,
                    "notification webhook unreachable"
                );
            }
        }
    }
}
