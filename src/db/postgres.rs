use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row};

use super::store::{EventStore, StoreError, StoreResult};
use crate::models::Event;

const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    body       JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS events_name_idx ON events (name);
"#;

/// PostgreSQL implementation of the event store.
///
/// Events are kept whole as JSONB; `id` and `name` are copied into columns so
/// the lookups can use an index.
pub struct PgEventStore {
    client: Client,
}

impl PgEventStore {
    /// Open a connection and drive it on a background task
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection closed with error");
            }
        });
        Ok(Self { client })
    }

    /// Create the events table if it does not exist
    pub async fn migrate(&self) -> StoreResult<()> {
        self.client.batch_execute(MIGRATION).await?;
        tracing::info!("Migrations completed successfully");
        Ok(())
    }
}

fn event_from_row(row: &Row) -> StoreResult<Event> {
    let body: serde_json::Value = row.get("body");
    Ok(serde_json::from_value(body)?)
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn create(&self, mut event: Event) -> StoreResult<String> {
        let id = event.ensure_id().to_string();
        let body = serde_json::to_value(&event)?;

        let inserted = self
            .client
            .execute(
                r#"
                INSERT INTO events (id, name, body)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO NOTHING
                "#,
                &[&id, &event.name, &body],
            )
            .await?;

        if inserted == 0 {
            return Err(StoreError::Conflict(id));
        }
        Ok(id)
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Event> {
        let row = self
            .client
            .query_opt("SELECT body FROM events WHERE id = $1", &[&id])
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("event {}", id)))?;
        event_from_row(&row)
    }

    async fn get_by_name(&self, name: &str) -> StoreResult<Event> {
        let row = self
            .client
            .query_opt(
                r#"
                SELECT body FROM events
                WHERE name = $1
                ORDER BY created_at ASC
                LIMIT 1
                "#,
                &[&name],
            )
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("event named {}", name)))?;
        event_from_row(&row)
    }

    async fn get_all(&self) -> StoreResult<Vec<Event>> {
        let rows = self
            .client
            .query("SELECT body FROM events ORDER BY created_at ASC, id ASC", &[])
            .await?;
        rows.iter().map(event_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_store_trait() {
        // Compile-time check that PgEventStore implements EventStore
        fn _assert_impl<T: EventStore>() {}
        _assert_impl::<PgEventStore>();
    }
}
