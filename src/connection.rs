use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;

use crate::broker::{AmqpBroker, Broker, BrokerChannel, MemoryBroker};
use crate::config::{BusBackend, BusSettings};
use crate::error::{BusError, BusResult};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Owns the single broker connection shared by a bus and its users.
///
/// Build one at startup and hand it around in an `Arc`. Every publish and
/// subscription runs as a tracked operation so that `close` can drain them
/// before the connection is torn down.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    closed: AtomicBool,
    /// Cancelled by `close`; active subscriptions stop on it
    shutdown: CancellationToken,
    in_flight: TaskTracker,
    grace_period: Duration,
}

impl ConnectionManager {
    /// Dial the configured broker.
    ///
    /// Fails with `Unreachable` or `AuthFailed`; there is no retry.
    pub async fn connect(settings: &BusSettings) -> BusResult<Self> {
        let broker: Arc<dyn Broker> = match settings.backend {
            BusBackend::Amqp => Arc::new(AmqpBroker::connect(settings).await?),
            BusBackend::Memory => {
                tracing::warn!("using in-memory broker, messages stay inside this process");
                Arc::new(MemoryBroker::new())
            }
        };
        Ok(Self::with_broker(broker).with_grace_period(settings.grace_period()))
    }

    /// Wrap an already connected broker
    pub fn with_broker(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            in_flight: TaskTracker::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// False once the connection was closed, locally or by the broker
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.broker.is_alive()
    }

    /// Number of publishes and subscriptions currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) async fn open_channel(&self) -> BusResult<Box<dyn BrokerChannel>> {
        if !self.is_alive() {
            return Err(BusError::ConnectionClosed);
        }
        self.broker.open_channel().await
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn track<F: Future>(&self, operation: F) -> TrackedFuture<F> {
        self.in_flight.track_future(operation)
    }

    /// Close the connection and every channel opened on it.
    ///
    /// New operations fail with `ConnectionClosed` from here on. Active
    /// subscriptions are told to stop, and in-flight operations get the
    /// grace period to finish before the connection is closed regardless.
    /// Calling this again is a no-op.
    pub async fn close(&self) -> BusResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let deadline = Instant::now() + self.grace_period;
        tracing::info!(
            in_flight = self.in_flight.len(),
            grace_period = ?self.grace_period,
            "closing broker connection"
        );

        self.shutdown.cancel();
        self.in_flight.close();
        if timeout_at(deadline, self.in_flight.wait()).await.is_err() {
            tracing::warn!(
                in_flight = self.in_flight.len(),
                "in-flight operations still running at shutdown deadline"
            );
        }

        match timeout_at(deadline, self.broker.close()).await {
            Ok(result) => {
                tracing::info!("broker connection closed");
                result
            }
            Err(_) => {
                tracing::error!("broker connection did not close before the deadline");
                Err(BusError::unexpected(
                    "close connection",
                    "shutdown deadline exceeded",
                ))
            }
        }
    }
}
