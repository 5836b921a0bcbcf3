use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Published in place of a flag key when every cached entry should go.
pub const WILDCARD: &str = "*";

/// What an invalidation touches, as seen by local listeners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationEvent {
    Flag(String),
    All,
}

impl InvalidationEvent {
    pub fn from_key(key: &str) -> Self {
        if key == WILDCARD {
            InvalidationEvent::All
        } else {
            InvalidationEvent::Flag(key.to_string())
        }
    }

    pub fn key(&self) -> &str {
        match self {
            InvalidationEvent::Flag(key) => key,
            InvalidationEvent::All => WILDCARD,
        }
    }
}

/// Wire format on the invalidation channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InvalidationMessage {
    pub key: String,
    /// Instance that published the message; it skips its own.
    pub origin: Uuid,
    pub published_at: DateTime<Utc>,
}

impl InvalidationMessage {
    pub fn new(event: &InvalidationEvent, origin: Uuid) -> Self {
        Self {
            key: event.key().to_string(),
            origin,
            published_at: Utc::now(),
        }
    }

    pub fn event(&self) -> InvalidationEvent {
        InvalidationEvent::from_key(&self.key)
    }
}
