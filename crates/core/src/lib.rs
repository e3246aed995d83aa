//! PulseTrack core — event model, error taxonomy, configuration, and the
//! signal bus shared by every crate in the tracker pipeline.

pub mod config;
pub mod error;
pub mod signal;
pub mod types;

pub use config::{RetryPolicy, TrackerConfig};
pub use error::{DeliveryError, StorageError, TrackerError, TrackerResult};
pub use signal::{DropReason, SignalSink, TrackerSignal};
pub use types::{
    DeliveryAck, EventBatch, EventDraft, IdentitySnapshot, QueueEntry, TrackerEvent,
    TrackerEventType,
};
