//! Events are the unit of storage in the event store.
//!
//! A [`NewEvent`] is what a caller appends; a [`StoredEvent`] is what the store hands back,
//! carrying the identity and ordering information the store assigned at commit time.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event proposed for storage, not yet assigned a position or sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// The event's name, e.g. `"order_placed"`.
    pub name: String,
    /// The event's payload. Opaque to the store: any JSON value.
    pub payload: Value,
    /// When the event was observed by the system. Defaults to now if omitted by the caller.
    pub observed_at: DateTime<Utc>,
    /// When the event actually occurred in the domain. Defaults to `observed_at` if omitted.
    pub occurred_at: DateTime<Utc>,
}

impl NewEvent {
    /// Creates a new event with both timestamps set to now.
    pub fn now(name: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            payload,
            observed_at: now,
            occurred_at: now,
        }
    }

    /// Creates a new event with an explicit `occurred_at`, leaving `observed_at` at now.
    pub fn occurred_at(name: impl Into<String>, payload: Value, occurred_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            payload,
            observed_at: Utc::now(),
            occurred_at,
        }
    }
}

/// An event as persisted by the store: a [`NewEvent`] plus the identity and ordering
/// information assigned at commit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// A unique identifier for this event, assigned by the store.
    pub id: String,
    /// The category of the stream this event was appended to.
    pub category: String,
    /// The stream this event was appended to.
    pub stream: String,
    /// The 0-based position of this event within its stream.
    pub position: i64,
    /// The strictly-increasing, log-wide sequence number of this event.
    pub sequence_number: i64,
    pub name: String,
    pub payload: Value,
    pub observed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Returns the [`crate::Identifier::Stream`] this event belongs to.
    pub fn stream_identifier(&self) -> crate::Identifier {
        crate::Identifier::stream(self.category.clone(), self.stream.clone())
    }
}
