// Event storage
//
// The HTTP layer writes events here first; the bus notification that follows
// is best-effort.

pub mod memory;
pub mod postgres;
pub mod store;

use std::sync::Arc;

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;
pub use store::{EventStore, StoreError, StoreResult};

use crate::config::DatabaseSettings;

/// Build the configured store: PostgreSQL when a URL is set, memory otherwise
pub async fn connect(settings: &DatabaseSettings) -> StoreResult<Arc<dyn EventStore>> {
    match settings.url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => {
            let store = PgEventStore::connect(url).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("no database url configured, events are kept in memory");
            Ok(Arc::new(MemoryEventStore::new()))
        }
    }
}
