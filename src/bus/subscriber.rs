use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::{EventHandler, Message};
use super::Bus;
use crate::broker::{BrokerChannel, DeliveryStream};
use crate::error::{BusError, BusResult};

impl Bus {
    /// Consume messages published on `topic` until the subscription ends.
    ///
    /// Blocks the calling task. A fresh queue is bound to `topic` for this
    /// call only, so two subscriptions on the same topic each get every
    /// message. Each message is acknowledged after `handler` returns `Ok`.
    /// The queue is deleted when the subscription ends, unless a handler
    /// failure left a message in it or the connection is gone.
    ///
    /// Returns `Ok(())` when `cancel` fires or the connection manager shuts
    /// down. A handler error negatively acknowledges the message (the broker
    /// requeues it) and is returned as `BusError::Handler`. If the broker
    /// ends the consumer, the result is `ConnectionClosed` when the
    /// connection is gone and `Unexpected` otherwise.
    pub async fn subscribe<H: EventHandler>(
        &self,
        cancel: CancellationToken,
        topic: &str,
        handler: H,
    ) -> BusResult<()> {
        self.connection
            .track(async {
                if !self.connection.is_alive() {
                    return Err(BusError::ConnectionClosed);
                }

                let mut channel = self.connection.open_channel().await?;
                let result = self
                    .consume_on(channel.as_mut(), &cancel, topic, &handler)
                    .await;
                if let Err(e) = channel.close().await {
                    tracing::warn!(topic = %topic, error = %e, "failed to close subscription channel");
                }

                match &result {
                    Ok(()) => tracing::info!(topic = %topic, "subscription stopped"),
                    Err(e) => tracing::warn!(topic = %topic, error = %e, "subscription failed"),
                }
                result
            })
            .await
    }

    async fn consume_on<H: EventHandler>(
        &self,
        channel: &mut dyn BrokerChannel,
        cancel: &CancellationToken,
        topic: &str,
        handler: &H,
    ) -> BusResult<()> {
        let shutdown = self.connection.shutdown_token();
        let mut queue = None;

        let setup = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = shutdown.cancelled() => None,
            setup = self.bind_queue(&mut *channel, &mut queue, topic) => Some(setup),
        };
        let result = match setup {
            None => Ok(()),
            Some(Ok(deliveries)) => {
                self.deliver(&mut *channel, deliveries, cancel, &shutdown, topic, handler)
                    .await
            }
            Some(Err(e)) => Err(e),
        };

        // The queue keeps a message rejected by the handler; a dead
        // connection leaves nothing to delete it with
        let keep_queue = matches!(
            result,
            Err(BusError::Handler(_)) | Err(BusError::ConnectionClosed)
        );
        if let Some(queue) = queue.filter(|_| !keep_queue) {
            if let Err(e) = channel.delete_queue(&queue).await {
                tracing::warn!(
                    topic = %topic,
                    queue = %queue,
                    error = %e,
                    "failed to delete subscription queue"
                );
            }
        }
        result
    }

    /// Declare the exchange and a fresh queue bound to `topic`, then start
    /// consuming it. The queue name is recorded as soon as it exists.
    async fn bind_queue(
        &self,
        channel: &mut dyn BrokerChannel,
        queue: &mut Option<String>,
        topic: &str,
    ) -> BusResult<DeliveryStream> {
        channel.declare_exchange(&self.exchange).await?;
        let name: &str = queue.insert(channel.declare_queue().await?);
        channel.bind_queue(name, &self.exchange, topic).await?;
        let deliveries = channel.consume(name).await?;
        tracing::info!(topic = %topic, queue = %name, "subscribed");
        Ok(deliveries)
    }

    async fn deliver<H: EventHandler>(
        &self,
        channel: &mut dyn BrokerChannel,
        mut deliveries: DeliveryStream,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
        topic: &str,
        handler: &H,
    ) -> BusResult<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = shutdown.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(delivery) => delivery?,
                None => return Err(self.consumer_ended()),
            };

            let delivery_tag = delivery.delivery_tag;
            tracing::trace!(
                topic = %topic,
                routing_key = %delivery.routing_key,
                delivery_tag,
                redelivered = delivery.redelivered,
                "received message"
            );

            if let Err(e) = handler.handle(Message::from(delivery)).await {
                if let Err(nack_err) = channel.nack(delivery_tag, true).await {
                    tracing::warn!(delivery_tag, error = %nack_err, "failed to nack message");
                }
                return Err(BusError::Handler(e));
            }
            channel.ack(delivery_tag).await?;
        }
    }

    fn consumer_ended(&self) -> BusError {
        if self.connection.is_alive() {
            BusError::unexpected("consume", "consumer cancelled by broker")
        } else {
            BusError::ConnectionClosed
        }
    }

    /// Run `subscribe` on its own task.
    ///
    /// The returned handle owns the task: cancel it, await it, or both.
    pub fn spawn_subscription<H>(&self, topic: impl Into<String>, handler: H) -> Subscription
    where
        H: EventHandler + 'static,
    {
        let topic = topic.into();
        let cancel = CancellationToken::new();
        let handle = {
            let bus = self.clone();
            let topic = topic.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.subscribe(cancel, &topic, handler).await })
        };
        Subscription {
            topic,
            cancel,
            handle,
        }
    }
}

/// A subscription running on its own task
pub struct Subscription {
    topic: String,
    cancel: CancellationToken,
    handle: JoinHandle<BusResult<()>>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Ask the subscription to stop; it closes its channel and returns
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the subscription to end and return its result
    pub async fn join(self) -> BusResult<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(BusError::unexpected("subscription task", e)),
        }
    }

    /// Cancel, then wait for the subscription to end
    pub async fn shutdown(self) -> BusResult<()> {
        self.cancel();
        self.join().await
    }
}
