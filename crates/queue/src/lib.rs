//! Durable event queue — append-only local store of pending events with
//! FIFO batch planning, surviving process restarts via a file journal.

pub mod batcher;
pub mod journal;
pub mod queue;

pub use batcher::Batcher;
pub use journal::EventJournal;
pub use queue::{EventQueue, QueueStats};
