//! Customer channel: where operator replies leave the relay.
//!
//! The messaging provider itself is external. The relay only needs something
//! that accepts `(customer_address, message)` and reports failure.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DeliveryConfig;
use crate::error::DeliveryError;
use crate::models::Message;

#[async_trait]
pub trait CustomerChannel: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, customer_address: &str, message: &Message)
    -> Result<(), DeliveryError>;
}

/// Records replies in the log only. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl CustomerChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(
        &self,
        customer_address: &str,
        message: &Message,
    ) -> Result<(), DeliveryError> {
        info!(
            customer = %customer_address,
            conversation = %message.conversation_id,
            message_id = message.id,
            "Reply for customer (no channel configured): {}",
            message.text
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    text: &'a str,
    conversation_id: &'a str,
    message_id: u64,
}

/// POSTs replies as JSON to the messaging provider's bridge.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: String, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CustomerChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(
        &self,
        customer_address: &str,
        message: &Message,
    ) -> Result<(), DeliveryError> {
        let payload = WebhookPayload {
            to: customer_address,
            text: &message.text,
            conversation_id: &message.conversation_id,
            message_id: message.id,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(DeliveryError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
            });
        }
        debug!(customer = %customer_address, message_id = message.id, "Webhook accepted reply");
        Ok(())
    }
}

/// Pick the channel implementation for the configured delivery settings.
pub fn channel_from_config(
    config: &DeliveryConfig,
) -> Result<Box<dyn CustomerChannel>, DeliveryError> {
    match &config.webhook_url {
        Some(url) => {
            info!("Customer replies go to webhook {}", url);
            Ok(Box::new(WebhookChannel::new(url.clone(), config.timeout)?))
        }
        None => {
            info!("No delivery webhook configured; customer replies are only logged");
            Ok(Box::new(LogChannel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::Utc;

    fn reply() -> Message {
        Message {
            id: 2,
            conversation_id: "c-1".into(),
            direction: Direction::Outgoing,
            sender: "ana@x.com".into(),
            text: "Hola, ¿en qué te ayudo?".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn log_channel_accepts_everything() {
        assert!(LogChannel.deliver("+569", &reply()).await.is_ok());
    }

    #[test]
    fn webhook_payload_shape() {
        let msg = reply();
        let payload = WebhookPayload {
            to: "+569",
            text: &msg.text,
            conversation_id: &msg.conversation_id,
            message_id: msg.id,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["to"], "+569");
        assert_eq!(json["message_id"], 2);
        assert_eq!(json["conversation_id"], "c-1");
    }

    #[test]
    fn channel_selection() {
        let none = DeliveryConfig {
            webhook_url: None,
            timeout: Duration::from_secs(1),
        };
        assert_eq!(channel_from_config(&none).unwrap().name(), "log");

        let hook = DeliveryConfig {
            webhook_url: Some("http://127.0.0.1:9/send".into()),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(channel_from_config(&hook).unwrap().name(), "webhook");
    }

    #[tokio::test]
    async fn webhook_unreachable_is_unavailable() {
        // Grab a free port, then close it so the connection is refused
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let channel = WebhookChannel::new(
            format!("http://127.0.0.1:{port}/send"),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = channel.deliver("+569", &reply()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unavailable));
    }
}
