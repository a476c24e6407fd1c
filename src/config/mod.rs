use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Which broker implementation backs the bus
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// A real AMQP 0-9-1 broker such as RabbitMQ
    #[default]
    Amqp,
    /// In-process broker, for local development
    Memory,
}

/// Message bus configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusSettings {
    #[serde(default)]
    pub backend: BusBackend,
    #[serde(default = "default_bus_host")]
    pub host: String,
    #[serde(default = "default_bus_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Topic exchange every publish and subscription goes through
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// How long `close` waits for in-flight operations (default: 10)
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

impl BusSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            host: default_bus_host(),
            port: default_bus_port(),
            username: String::new(),
            password: String::new(),
            exchange: default_exchange(),
            grace_period_secs: default_grace_period(),
        }
    }
}

fn default_bus_host() -> String {
    "localhost".to_string()
}

fn default_bus_port() -> u16 {
    5672
}

fn default_exchange() -> String {
    "events".to_string()
}

fn default_grace_period() -> u64 {
    10
}

/// HTTP listener configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

/// Event store configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DatabaseSettings {
    /// PostgreSQL connection string. Events are kept in memory when unset.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with defaults
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (not tracked by git)
            .add_source(File::with_name("config/local").required(false))
            // e.g. TOPICBUS_BUS__HOST=rabbitmq
            .add_source(
                Environment::with_prefix("TOPICBUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
