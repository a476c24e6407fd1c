//! Topic-based message bus over an AMQP broker.
//!
//! A [`ConnectionManager`] owns the one broker connection. A [`Bus`] built on
//! it publishes byte payloads to a topic exchange and runs blocking,
//! cancellable subscriptions with manual acknowledgement. Every operation
//! opens its own channel and closes it before returning.
//!
//! The events service in `main.rs` embeds the bus behind a small HTTP API.

pub mod api;
pub mod broker;
pub mod bus;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod models;

pub use bus::{Bus, EventHandler, Message, Payload, Subscription, Topic};
pub use connection::ConnectionManager;
pub use error::{BusError, BusResult};
