use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::{EventStore, StoreError, StoreResult};
use crate::models::Event;

/// Event store kept in process memory
#[derive(Default)]
pub struct MemoryEventStore {
    /// id -> event, plus insertion order for stable listings
    events: RwLock<(HashMap<String, Event>, Vec<String>)>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create(&self, mut event: Event) -> StoreResult<String> {
        let id = event.ensure_id().to_string();
        let mut guard = self.events.write().await;
        let (events, order) = &mut *guard;
        if events.contains_key(&id) {
            return Err(StoreError::Conflict(id));
        }
        order.push(id.clone());
        events.insert(id.clone(), event);
        Ok(id)
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Event> {
        let guard = self.events.read().await;
        guard
            .0
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("event {}", id)))
    }

    async fn get_by_name(&self, name: &str) -> StoreResult<Event> {
        let guard = self.events.read().await;
        let (events, order) = &*guard;
        order
            .iter()
            .filter_map(|id| events.get(id))
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("event named {}", name)))
    }

    async fn get_all(&self) -> StoreResult<Vec<Event>> {
        let guard = self.events.read().await;
        let (events, order) = &*guard;
        Ok(order.iter().filter_map(|id| events.get(id)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str) -> Event {
        serde_json::from_value(json!({
            "name": name,
            "start_date": "2026-09-01T09:00:00Z",
            "end_date": "2026-09-01T18:00:00Z",
            "location": { "name": "Hall 1" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_reads_back() {
        let store = MemoryEventStore::new();
        let id = store.create(event("Launch")).await.unwrap();

        let by_id = store.get_by_id(&id).await.unwrap();
        assert_eq!(by_id.name, "Launch");
        assert_eq!(by_id.id, id);

        let by_name = store.get_by_name("Launch").await.unwrap();
        assert_eq!(by_name.id, id);
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let store = MemoryEventStore::new();
        let mut first = event("A");
        first.id = "same".to_string();
        let mut second = event("B");
        second.id = "same".to_string();

        store.create(first).await.unwrap();
        assert!(matches!(
            store.create(second).await,
            Err(StoreError::Conflict(id)) if id == "same"
        ));
    }

    #[tokio::test]
    async fn test_missing_events_are_not_found() {
        let store = MemoryEventStore::new();
        assert!(matches!(
            store.get_by_id("nope").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_by_name("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_all_keeps_insertion_order() {
        let store = MemoryEventStore::new();
        for name in ["first", "second", "third"] {
            store.create(event(name)).await.unwrap();
        }
        let names: Vec<String> = store
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
