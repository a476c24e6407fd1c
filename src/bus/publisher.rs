use super::types::Payload;
use super::Bus;
use crate::broker::BrokerChannel;
use crate::error::{BusError, BusResult};

const JSON: &str = "application/json";

impl Bus {
    /// Publish `payload` to the exchange with `topic` as routing key.
    ///
    /// The broker may drop the message when no queue is bound to `topic`;
    /// that is not an error. Fails with `ConnectionClosed` once the
    /// connection is gone, without touching the broker.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> BusResult<()> {
        self.publish_with(topic, payload, None).await
    }

    /// Serialize a typed event as JSON and publish it on its own topic
    pub async fn publish_event<P: Payload + Sync>(&self, event: &P) -> BusResult<()> {
        let body =
            serde_json::to_vec(event).map_err(|e| BusError::unexpected("marshal payload", e))?;
        self.publish_with(event.topic(), &body, Some(JSON)).await
    }

    async fn publish_with(
        &self,
        topic: &str,
        payload: &[u8],
        content_type: Option<&str>,
    ) -> BusResult<()> {
        self.connection
            .track(async {
                if !self.connection.is_alive() {
                    return Err(BusError::ConnectionClosed);
                }

                // A channel must not be used by two publishers at once, so
                // each call gets its own.
                let mut channel = self.connection.open_channel().await?;
                let result = publish_on(
                    channel.as_mut(),
                    &self.exchange,
                    topic,
                    payload,
                    content_type,
                )
                .await;
                if let Err(e) = channel.close().await {
                    tracing::warn!(topic = %topic, error = %e, "failed to close publish channel");
                }

                match &result {
                    Ok(()) => tracing::debug!(
                        topic = %topic,
                        bytes = payload.len(),
                        "published message"
                    ),
                    Err(e) => tracing::debug!(topic = %topic, error = %e, "publish failed"),
                }
                result
            })
            .await
    }
}

async fn publish_on(
    channel: &mut dyn BrokerChannel,
    exchange: &str,
    topic: &str,
    payload: &[u8],
    content_type: Option<&str>,
) -> BusResult<()> {
    channel.declare_exchange(exchange).await?;
    channel
        .publish(exchange, topic, payload, content_type)
        .await
}
