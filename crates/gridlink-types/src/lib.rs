use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Event wrapper delivered as the first argument to every bus listener.
///
/// Listeners subscribed with wildcard patterns receive events from many
/// concrete topics, so the event carries the topic it was published on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Concrete topic the event was published on, e.g. `"devices/d1/temperature"`.
    pub topic: String,
}

impl BusEvent {
    /// Create an event for `topic` stamped with a fresh id and the current UTC time.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            topic: topic.into(),
        }
    }
}

/// Errors surfaced by the topic grammar.
///
/// These are caller programming errors, raised synchronously at the point of
/// parsing. Listener failures during dispatch are never surfaced here; the bus
/// contains them and logs them instead.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("topic {topic:?} contains an empty segment")]
    EmptySegment { topic: String },

    #[error("multi-level wildcard must be the final segment of {topic:?}")]
    WildcardPosition { topic: String },

    #[error("publish topic {topic:?} must not contain wildcards")]
    WildcardInPublish { topic: String },
}
