use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{topic, Broker, BrokerChannel, Delivery, DeliveryStream};
use crate::error::{BusError, BusResult};

/// In-process broker with topic exchange semantics
///
/// Queues, bindings, manual acknowledgement and requeue-on-nack behave like an
/// AMQP broker: unacked deliveries go back to their queue when the channel
/// that received them is closed or dropped, and publishes that match no
/// binding are silently discarded.
///
/// Cloning yields another handle to the same broker, which lets tests keep a
/// handle for inspection after passing one to the connection manager.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    /// Cancelled when the connection goes away; every channel token is a child
    shutdown: CancellationToken,
    open_channels: AtomicUsize,
}

#[derive(Default)]
struct State {
    exchanges: HashSet<String>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Envelope>,
    notify: Arc<Notify>,
}

struct Binding {
    exchange: String,
    queue: String,
    key: String,
}

#[derive(Clone)]
struct Envelope {
    routing_key: String,
    content_type: Option<String>,
    payload: Vec<u8>,
    redelivered: bool,
}

type Unacked = Arc<Mutex<HashMap<u64, (String, Envelope)>>>;

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the connection from the broker side, as a broker restart would
    pub fn sever(&self) {
        tracing::debug!("memory broker severing connection");
        self.inner.shutdown.cancel();
    }

    pub fn exchange_exists(&self, exchange: &str) -> bool {
        self.inner.state.lock().exchanges.contains(exchange)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.inner.state.lock().queues.keys().cloned().collect()
    }

    /// Queues a publish with `routing_key` on `exchange` would reach
    pub fn bound_queues(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut queues: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic::matches(&b.key, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        queues.sort();
        queues.dedup();
        queues
    }

    /// Number of messages waiting in `queue` to be delivered
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
    }

    /// Peek at the payloads waiting in `queue`, oldest first
    pub fn queued_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|e| e.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Channels opened on this broker and not yet closed or dropped
    pub fn open_channels(&self) -> usize {
        self.inner.open_channels.load(Ordering::SeqCst)
    }

    /// Delete a queue from the broker side, as an operator would.
    ///
    /// Consumers on the queue end while the connection stays up.
    pub fn delete_queue(&self, queue: &str) {
        self.inner.delete_queue(queue);
    }
}

impl Inner {
    fn delete_queue(&self, queue: &str) {
        let mut state = self.state.lock();
        state.bindings.retain(|b| b.queue != queue);
        if let Some(q) = state.queues.remove(queue) {
            q.notify.notify_waiters();
        }
    }

    fn requeue(&self, queue: &str, mut envelope: Envelope) {
        envelope.redelivered = true;
        let mut state = self.state.lock();
        if let Some(q) = state.queues.get_mut(queue) {
            q.ready.push_front(envelope);
            q.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_channel(&self) -> BusResult<Box<dyn BrokerChannel>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(BusError::ConnectionClosed);
        }
        self.inner.open_channels.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryChannel {
            broker: self.inner.clone(),
            token: self.inner.shutdown.child_token(),
            unacked: Arc::default(),
            next_tag: Arc::new(AtomicU64::new(1)),
            released: false,
        }))
    }

    fn is_alive(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
    }

    async fn close(&self) -> BusResult<()> {
        self.inner.shutdown.cancel();
        Ok(())
    }
}

struct MemoryChannel {
    broker: Arc<Inner>,
    token: CancellationToken,
    unacked: Unacked,
    next_tag: Arc<AtomicU64>,
    released: bool,
}

impl MemoryChannel {
    fn ensure_open(&self, context: &'static str) -> BusResult<()> {
        if self.broker.shutdown.is_cancelled() {
            return Err(BusError::ConnectionClosed);
        }
        if self.token.is_cancelled() {
            return Err(BusError::unexpected(context, "channel closed"));
        }
        Ok(())
    }

    /// Return unacked deliveries to their queues and end any consumers
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.token.cancel();

        let mut pending: Vec<(u64, (String, Envelope))> = self.unacked.lock().drain().collect();
        // push_front in reverse tag order keeps the original delivery order
        pending.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, (queue, envelope)) in pending {
            self.broker.requeue(&queue, envelope);
        }
        self.broker.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&mut self, exchange: &str) -> BusResult<()> {
        self.ensure_open("exchange declare")?;
        self.broker
            .state
            .lock()
            .exchanges
            .insert(exchange.to_string());
        Ok(())
    }

    async fn declare_queue(&mut self) -> BusResult<String> {
        self.ensure_open("queue declare")?;
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());
        self.broker
            .state
            .lock()
            .queues
            .insert(name.clone(), Queue::default());
        Ok(name)
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> BusResult<()> {
        self.ensure_open("queue bind")?;
        let mut state = self.broker.state.lock();
        if !state.exchanges.contains(exchange) {
            return Err(BusError::unexpected(
                "queue bind",
                format!("no exchange '{}'", exchange),
            ));
        }
        if !state.queues.contains_key(queue) {
            return Err(BusError::unexpected(
                "queue bind",
                format!("no queue '{}'", queue),
            ));
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.queue == queue && b.key == binding_key);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                key: binding_key.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_queue(&mut self, queue: &str) -> BusResult<()> {
        self.ensure_open("queue delete")?;
        self.broker.delete_queue(queue);
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        content_type: Option<&str>,
    ) -> BusResult<()> {
        self.ensure_open("publish")?;
        let mut state = self.broker.state.lock();
        if !state.exchanges.contains(exchange) {
            return Err(BusError::unexpected(
                "publish",
                format!("no exchange '{}'", exchange),
            ));
        }

        let targets: HashSet<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic::matches(&b.key, routing_key))
            .map(|b| b.queue.clone())
            .collect();

        if targets.is_empty() {
            tracing::trace!(routing_key = %routing_key, "unroutable message dropped");
        }

        for name in targets {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.ready.push_back(Envelope {
                    routing_key: routing_key.to_string(),
                    content_type: content_type.map(str::to_string),
                    payload: payload.to_vec(),
                    redelivered: false,
                });
                queue.notify.notify_waiters();
            }
        }
        Ok(())
    }

    async fn consume(&mut self, queue: &str) -> BusResult<DeliveryStream> {
        self.ensure_open("queue consume")?;
        let notify = self
            .broker
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.notify.clone())
            .ok_or_else(|| {
                BusError::unexpected("queue consume", format!("no queue '{}'", queue))
            })?;

        let consumer = Consumer {
            broker: self.broker.clone(),
            queue: queue.to_string(),
            notify,
            token: self.token.clone(),
            unacked: self.unacked.clone(),
            next_tag: self.next_tag.clone(),
        };

        let stream = stream::unfold(consumer, |consumer| async move {
            let delivery = consumer.next_delivery().await?;
            Some((Ok(delivery), consumer))
        });
        Ok(stream.boxed())
    }

    async fn ack(&mut self, delivery_tag: u64) -> BusResult<()> {
        self.ensure_open("ack")?;
        match self.unacked.lock().remove(&delivery_tag) {
            Some(_) => Ok(()),
            None => Err(BusError::unexpected(
                "ack",
                format!("unknown delivery tag {}", delivery_tag),
            )),
        }
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> BusResult<()> {
        self.ensure_open("nack")?;
        let entry = self.unacked.lock().remove(&delivery_tag);
        match entry {
            Some((queue, envelope)) => {
                if requeue {
                    self.broker.requeue(&queue, envelope);
                }
                Ok(())
            }
            None => Err(BusError::unexpected(
                "nack",
                format!("unknown delivery tag {}", delivery_tag),
            )),
        }
    }

    async fn close(&mut self) -> BusResult<()> {
        self.release();
        Ok(())
    }
}

struct Consumer {
    broker: Arc<Inner>,
    queue: String,
    notify: Arc<Notify>,
    token: CancellationToken,
    unacked: Unacked,
    next_tag: Arc<AtomicU64>,
}

impl Consumer {
    async fn next_delivery(&self) -> Option<Delivery> {
        loop {
            // Register interest before checking the queue so a publish in
            // between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.token.is_cancelled() || !self.queue_exists() {
                return None;
            }
            if let Some(delivery) = self.pop() {
                return Some(delivery);
            }

            tokio::select! {
                _ = self.token.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    fn queue_exists(&self) -> bool {
        self.broker.state.lock().queues.contains_key(&self.queue)
    }

    fn pop(&self) -> Option<Delivery> {
        let envelope = {
            let mut state = self.broker.state.lock();
            state.queues.get_mut(&self.queue)?.ready.pop_front()?
        };
        let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery {
            delivery_tag,
            routing_key: envelope.routing_key.clone(),
            content_type: envelope.content_type.clone(),
            payload: envelope.payload.clone(),
            redelivered: envelope.redelivered,
        };
        self.unacked
            .lock()
            .insert(delivery_tag, (self.queue.clone(), envelope));
        Some(delivery)
    }
}
