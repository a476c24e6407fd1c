use async_trait::async_trait;
use thiserror::Error;

use crate::models::Event;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("event {0} already exists")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Document store for events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store a new event and return its id
    async fn create(&self, event: Event) -> StoreResult<String>;

    async fn get_by_id(&self, id: &str) -> StoreResult<Event>;

    /// Look an event up by its exact name
    async fn get_by_name(&self, name: &str) -> StoreResult<Event>;

    async fn get_all(&self) -> StoreResult<Vec<Event>>;
}
