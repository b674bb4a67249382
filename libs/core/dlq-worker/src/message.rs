//! Pulled messages, their transport and the user handler seam.

use crate::error::{GatewayError, HandlerError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

/// One message pulled from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned message id
    pub message_id: String,

    /// Handle used to ack or nack this delivery
    pub ack_id: String,

    /// Decoded payload
    pub body: Bytes,

    pub attributes: HashMap<String, String>,

    /// Set when the subscription has a dead-letter policy
    pub delivery_attempt: Option<u32>,

    /// Whether the transport supports a negative acknowledgement for this
    /// delivery. Failed, non-nackable messages are left for redelivery.
    pub nackable: bool,
}

impl Message {
    pub fn new(ack_id: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            message_id: String::new(),
            ack_id: ack_id.into(),
            body: body.into(),
            attributes: HashMap::new(),
            delivery_attempt: None,
            nackable: true,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = Some(attempt);
        self
    }

    pub fn with_nackable(mut self, nackable: bool) -> Self {
        self.nackable = nackable;
        self
    }

    /// Payload as UTF-8, replacing invalid sequences.
    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_attempt.is_some_and(|n| n > 1)
    }
}

/// Terminal state of one dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Acked,
    Nacked,
    /// Neither acked nor nacked; the transport redelivers after the ack
    /// deadline.
    Pending,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Acked => "acked",
            Disposition::Nacked => "nacked",
            Disposition::Pending => "pending",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport a [`crate::SubscriptionReceiver`] pulls from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    async fn pull(&self) -> Result<Message, GatewayError>;

    async fn ack(&self, ack_id: &str) -> Result<(), GatewayError>;

    /// Ask for immediate redelivery.
    async fn nack(&self, ack_id: &str) -> Result<(), GatewayError>;

    /// Subscription name, used in logs and metric labels.
    fn name(&self) -> &str;
}

/// User callback invoked once per pulled message.
///
/// `Ok` acks the message. `Err` nacks it when the message is nackable and
/// leaves it pending otherwise. A panic is treated like `Err`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;

    fn name(&self) -> &'static str {
        "handler"
    }
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`]. The closure receives its own
/// copy of the message; the payload is reference counted.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        (self.f)(message.clone()).await
    }

    fn name(&self) -> &'static str {
        "fn_handler"
    }
}
