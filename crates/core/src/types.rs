//! Event model shared across the tracker pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerEventType {
    SessionStart,
    SessionEnd,
    CustomEvent,
    Purchase,
    ScreenView,
    PushOpen,
    PushReceived,
    LocationUpdate,
    AttributeChange,
}

/// Identity fields frozen into an event at enqueue time. Later identity
/// changes never retroactively alter queued events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub custom_identifier: Option<String>,
    pub custom_email: Option<String>,
    pub anonymous_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerEvent {
    pub id: Uuid,
    pub event_type: TrackerEventType,
    pub name: Option<String>,
    pub params: HashMap<String, serde_json::Value>,
    pub identity: IdentitySnapshot,
    /// Capture time, not send time.
    pub timestamp: DateTime<Utc>,
}

/// Caller-facing event description. The tracker attaches id, identity
/// snapshot, and capture timestamp when the draft is sent.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: TrackerEventType,
    pub name: Option<String>,
    pub params: HashMap<String, serde_json::Value>,
}

impl EventDraft {
    pub fn new(event_type: TrackerEventType) -> Self {
        Self {
            event_type,
            name: None,
            params: HashMap::new(),
        }
    }

    /// A named custom event.
    pub fn custom(name: impl Into<String>) -> Self {
        Self {
            event_type: TrackerEventType::CustomEvent,
            name: Some(name.into()),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// A queued event plus its delivery metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Monotonic, assigned by the queue at enqueue time.
    pub entry_id: u64,
    pub event: TrackerEvent,
    /// Serialized size of the event, used for byte-bounded batching.
    pub payload_bytes: usize,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_failure: Option<String>,
}

/// An ordered, immutable set of entries selected for one delivery attempt.
/// Entries arriving during an in-flight send wait for the next batch.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub batch_id: Uuid,
    pub entries: Vec<QueueEntry>,
}

impl EventBatch {
    pub fn new(entries: Vec<QueueEntry>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            entries,
        }
    }

    pub fn entry_ids(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.entry_id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn payload_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.payload_bytes).sum()
    }

    /// Prior delivery attempts carried by this batch: the maximum over its
    /// entries, so attempts survive requeues and journal replays.
    pub fn attempts(&self) -> u32 {
        self.entries.iter().map(|e| e.attempts).max().unwrap_or(0)
    }
}

/// Server acknowledgement that a batch was durably received.
#[derive(Debug, Clone)]
pub struct DeliveryAck {
    pub batch_id: Uuid,
    pub accepted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, attempts: u32, bytes: usize) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            entry_id: id,
            event: TrackerEvent {
                id: Uuid::new_v4(),
                event_type: TrackerEventType::CustomEvent,
                name: Some("test".into()),
                params: HashMap::new(),
                identity: IdentitySnapshot {
                    custom_identifier: None,
                    custom_email: None,
                    anonymous_id: Uuid::new_v4(),
                },
                timestamp: now,
            },
            payload_bytes: bytes,
            enqueued_at: now,
            attempts,
            last_attempt_at: None,
            last_failure: None,
        }
    }

    #[test]
    fn test_draft_builder() {
        let draft = EventDraft::custom("checkout")
            .with_param("total", 42)
            .with_param("currency", "EUR");
        assert_eq!(draft.event_type, TrackerEventType::CustomEvent);
        assert_eq!(draft.name.as_deref(), Some("checkout"));
        assert_eq!(draft.params["total"], 42);
        assert_eq!(draft.params["currency"], "EUR");
    }

    #[test]
    fn test_batch_accessors() {
        let batch = EventBatch::new(vec![entry(1, 0, 100), entry(2, 3, 250), entry(3, 1, 50)]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.entry_ids(), vec![1, 2, 3]);
        assert_eq!(batch.payload_bytes(), 400);
        assert_eq!(batch.attempts(), 3);
    }

    #[test]
    fn test_empty_batch() {
        let batch = EventBatch::new(Vec::new());
        assert!(batch.is_empty());
        assert_eq!(batch.attempts(), 0);
    }

    #[test]
    fn test_queue_entry_roundtrip() {
        let e = entry(7, 2, 128);
        let json = serde_json::to_string(&e).unwrap();
        let back: QueueEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entry_id, 7);
        assert_eq!(back.attempts, 2);
        assert_eq!(back.payload_bytes, 128);
    }
}
