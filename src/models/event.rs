use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::{Payload, Topic};

// ============================================================================
// Event
// ============================================================================

/// An event stored by the service (concert, conference, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned on create when left empty
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Length of the event in nanoseconds
    #[serde(default)]
    pub duration: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Location,
}

impl Event {
    /// Fill in a fresh id if the caller did not supply one
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        &self.id
    }

    pub fn length(&self) -> chrono::Duration {
        chrono::Duration::nanoseconds(self.duration)
    }
}

// ============================================================================
// Location
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub country: String,
    pub open_time: Option<DateTime<Utc>>,
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub halls: Vec<Hall>,
}

/// The room where the event takes place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hall {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    pub capacity: u32,
}

// ============================================================================
// Bus payloads
// ============================================================================

/// Published on `event.created` after an event is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCreated {
    pub id: String,
    pub name: String,
    pub location_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl From<&Event> for EventCreated {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            name: event.name.clone(),
            location_id: event.location.name.clone(),
            start: event.start_date,
            end: event.end_date,
        }
    }
}

impl Payload for EventCreated {
    fn topic(&self) -> &str {
        Topic::EVENT_CREATED
    }
}
