use super::GcpClient;
use crate::error::GatewayError;
use crate::message::{Message, MessageSource};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{trace, warn};

/// Pause between empty pull responses.
const EMPTY_PULL_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
struct PullRequest {
    #[serde(rename = "maxMessages")]
    max_messages: u32,
}

#[derive(Debug, Default, Deserialize)]
struct PullResponse {
    #[serde(rename = "receivedMessages", default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
struct ReceivedMessage {
    #[serde(rename = "ackId")]
    ack_id: String,
    message: PubsubMessage,
    #[serde(rename = "deliveryAttempt")]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PubsubMessage {
    /// Base64-encoded payload; absent for attribute-only messages
    data: Option<String>,
    #[serde(rename = "messageId", default)]
    message_id: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

/// [`MessageSource`] over one Pub/Sub subscription.
pub struct GcpSubscription {
    client: GcpClient,
    subscription_id: String,
    resource: String,
}

impl GcpSubscription {
    pub fn new(client: GcpClient, project_id: &str, subscription_id: impl Into<String>) -> Self {
        let subscription_id = subscription_id.into();
        let resource = format!("projects/{project_id}/subscriptions/{subscription_id}");
        Self {
            client,
            subscription_id,
            resource,
        }
    }

    /// Full resource name, `projects/{project}/subscriptions/{id}`.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn url(&self, method: &str) -> String {
        self.client.pubsub_url(&format!("{}:{}", self.resource, method))
    }
}

#[async_trait]
impl MessageSource for GcpSubscription {
    /// Pulls one message, polling until the subscription delivers one.
    async fn pull(&self) -> Result<Message, GatewayError> {
        let url = self.url("pull");
        let request = PullRequest { max_messages: 1 };

        loop {
            let response: PullResponse = self.client.post_json(&url, &request).await?;
            if let Some(received) = response.received_messages.into_iter().next() {
                return Ok(decode_message(received));
            }
            trace!(subscription = %self.subscription_id, "Empty pull, polling again");
            tokio::time::sleep(EMPTY_PULL_BACKOFF).await;
        }
    }

    async fn ack(&self, ack_id: &str) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .client
            .post_json(&self.url("acknowledge"), &json!({ "ackIds": [ack_id] }))
            .await?;
        Ok(())
    }

    /// A zero ack deadline makes the message immediately redeliverable.
    async fn nack(&self, ack_id: &str) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .client
            .post_json(
                &self.url("modifyAckDeadline"),
                &json!({ "ackIds": [ack_id], "ackDeadlineSeconds": 0 }),
            )
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.subscription_id
    }
}

/// Payloads that are not valid base64 are delivered as the raw `data` bytes so
/// the message keeps its ack id and can still be settled.
fn decode_message(received: ReceivedMessage) -> Message {
    let body = match received.message.data {
        Some(data) if !data.is_empty() => match STANDARD.decode(&data) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    ack_id = %received.ack_id,
                    error = %e,
                    "Message data is not base64, delivering raw bytes"
                );
                data.into_bytes()
            }
        },
        _ => Vec::new(),
    };

    let mut message = Message::new(received.ack_id, body).with_message_id(received.message.message_id);
    message.attributes = received.message.attributes;
    message.delivery_attempt = received.delivery_attempt;
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::AccessTokenProvider;
    use std::sync::Arc;

    fn subscription() -> GcpSubscription {
        let client = GcpClient::new(
            reqwest::Client::new(),
            Arc::new(AccessTokenProvider::anonymous()),
            "http://localhost:8085",
            "http://localhost:9090",
        );
        GcpSubscription::new(client, "jojo-project", "orders.push.dlq.pull")
    }

    #[test]
    fn test_method_urls() {
        let sub = subscription();
        assert_eq!(sub.name(), "orders.push.dlq.pull");
        assert_eq!(
            sub.resource(),
            "projects/jojo-project/subscriptions/orders.push.dlq.pull"
        );
        assert_eq!(
            sub.url("modifyAckDeadline"),
            "http://localhost:8085/v1/projects/jojo-project/subscriptions/orders.push.dlq.pull:modifyAckDeadline"
        );
    }

    #[test]
    fn test_decode_pull_response() {
        let body = r#"{
            "receivedMessages": [{
                "ackId": "ack-123",
                "message": {
                    "data": "aGVsbG8gZGxx",
                    "messageId": "9001",
                    "attributes": {"origin": "orders"},
                    "publishTime": "2024-01-01T00:00:00Z"
                },
                "deliveryAttempt": 5
            }]
        }"#;
        let response: PullResponse = serde_json::from_str(body).unwrap();
        let received = response.received_messages.into_iter().next().unwrap();
        let message = decode_message(received);

        assert_eq!(message.ack_id, "ack-123");
        assert_eq!(message.message_id, "9001");
        assert_eq!(message.body_lossy(), "hello dlq");
        assert_eq!(message.attributes["origin"], "orders");
        assert_eq!(message.delivery_attempt, Some(5));
        assert!(message.nackable);
    }

    #[test]
    fn test_decode_message_without_data() {
        let received = ReceivedMessage {
            ack_id: "a".to_string(),
            message: PubsubMessage {
                data: None,
                message_id: "1".to_string(),
                attributes: HashMap::new(),
            },
            delivery_attempt: None,
        };
        assert!(decode_message(received).body.is_empty());
    }

    #[test]
    fn test_invalid_base64_keeps_ack_id_and_raw_body() {
        let received = ReceivedMessage {
            ack_id: "ack-7".to_string(),
            message: PubsubMessage {
                data: Some("***".to_string()),
                message_id: "42".to_string(),
                attributes: HashMap::new(),
            },
            delivery_attempt: Some(2),
        };
        let message = decode_message(received);

        assert_eq!(message.ack_id, "ack-7");
        assert_eq!(message.message_id, "42");
        assert_eq!(message.body_lossy(), "***");
        assert_eq!(message.delivery_attempt, Some(2));
    }

    #[test]
    fn test_empty_pull_response() {
        let response: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(response.received_messages.is_empty());
    }
}
