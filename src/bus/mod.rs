// Message Bus
//
// Publish and subscribe over a single topic exchange. The bus holds no
// channel of its own: every publish and every subscription opens a fresh
// channel on the shared connection and closes it when done.

pub mod kinds;
pub mod publisher;
pub mod subscriber;
pub mod types;

use std::sync::Arc;

use crate::connection::ConnectionManager;
use crate::error::BusResult;

pub use kinds::Topic;
pub use subscriber::Subscription;
pub use types::{EventHandler, Message, Payload};

/// Topic-based publish/subscribe over one exchange.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Bus {
    connection: Arc<ConnectionManager>,
    exchange: Arc<str>,
}

impl Bus {
    pub fn new(connection: Arc<ConnectionManager>, exchange: impl Into<String>) -> Self {
        Self {
            connection,
            exchange: Arc::from(exchange.into()),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }

    /// Close the underlying connection, draining in-flight operations first
    pub async fn close(&self) -> BusResult<()> {
        self.connection.close().await
    }
}
