// Broker backends
//
// The bus talks to the broker through two seams: a `Broker`, which is the one
// shared connection, and a `BrokerChannel`, the short-lived session opened on
// it for a single publish or subscription.

pub mod amqp;
pub mod memory;
pub mod topic;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::BusResult;

pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

/// A message handed out by a channel's consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Channel-scoped tag used to ack or nack this delivery
    pub delivery_tag: u64,
    pub routing_key: String,
    /// MIME type set by the publisher, if any
    pub content_type: Option<String>,
    pub payload: Vec<u8>,
    /// Set when the broker has delivered this message before
    pub redelivered: bool,
}

pub type DeliveryStream = BoxStream<'static, BusResult<Delivery>>;

/// One physical connection to a broker.
///
/// Implementations must allow channels to be opened concurrently from many
/// tasks.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new logical channel on this connection
    async fn open_channel(&self) -> BusResult<Box<dyn BrokerChannel>>;

    /// Whether the connection is still usable
    fn is_alive(&self) -> bool;

    /// Close the connection and every channel opened on it
    async fn close(&self) -> BusResult<()>;
}

/// A logical session multiplexed over a `Broker` connection.
///
/// Every operation takes `&mut self` and the trait is not `Sync`: a channel
/// belongs to exactly one publish or subscription at a time.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Declare a durable topic exchange (no-op when it already exists)
    async fn declare_exchange(&mut self, exchange: &str) -> BusResult<()>;

    /// Declare an anonymous durable queue and return its broker-assigned name
    async fn declare_queue(&mut self) -> BusResult<String>;

    async fn bind_queue(&mut self, queue: &str, exchange: &str, binding_key: &str)
        -> BusResult<()>;

    /// Delete `queue` with its bindings; consumers on it are cancelled.
    /// Deleting a queue that does not exist succeeds.
    async fn delete_queue(&mut self, queue: &str) -> BusResult<()>;

    /// Publish without the mandatory or immediate flags
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        content_type: Option<&str>,
    ) -> BusResult<()>;

    /// Start consuming `queue` with manual acknowledgement.
    ///
    /// The stream ends when the channel or its connection is closed.
    async fn consume(&mut self, queue: &str) -> BusResult<DeliveryStream>;

    async fn ack(&mut self, delivery_tag: u64) -> BusResult<()>;

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> BusResult<()>;

    /// Close the channel. Closing an already closed channel is a no-op.
    async fn close(&mut self) -> BusResult<()>;
}
