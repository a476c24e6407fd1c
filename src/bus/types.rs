use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::broker::Delivery;

/// A message received by a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Routing key the message was published with
    pub topic: String,
    /// `application/json` for typed events published with `publish_event`
    pub content_type: Option<String>,
    pub payload: Vec<u8>,
    /// The broker delivered this message before (at-least-once duplicate)
    pub redelivered: bool,
}

impl Message {
    /// Decode a JSON payload
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    /// Get the payload as a string (if valid UTF-8)
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl From<Delivery> for Message {
    fn from(delivery: Delivery) -> Self {
        Self {
            topic: delivery.routing_key,
            content_type: delivery.content_type,
            payload: delivery.payload,
            redelivered: delivery.redelivered,
        }
    }
}

/// A typed event that knows which topic it is published on
pub trait Payload: Serialize {
    fn topic(&self) -> &str;
}

/// Callback run for every message a subscription receives.
///
/// Returning an error stops the subscription; the message is not
/// acknowledged and stays with the broker.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, message: Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        (self)(message).await
    }
}
