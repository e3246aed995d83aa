//! Batch planning — pure, deterministic selection of the next delivery
//! batch. No side effects and no I/O, so it unit-tests independently of
//! storage and network.

use pulse_core::config::TrackerConfig;
use pulse_core::types::QueueEntry;

#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    max_count: usize,
    max_bytes: usize,
}

impl Batcher {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            max_count,
            max_bytes,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.max_batch_count, config.max_batch_bytes)
    }

    /// Select oldest-first entries for the next batch, bounded by count and
    /// byte limits. The first entry is always admitted, even when it alone
    /// exceeds the byte limit, so an oversized event cannot wedge the queue.
    pub fn plan<'a>(&self, entries: impl IntoIterator<Item = &'a QueueEntry>) -> Vec<QueueEntry> {
        let mut selected = Vec::new();
        let mut bytes = 0usize;

        for entry in entries {
            if selected.len() >= self.max_count {
                break;
            }
            if !selected.is_empty() && bytes + entry.payload_bytes > self.max_bytes {
                break;
            }
            bytes += entry.payload_bytes;
            selected.push(entry.clone());
        }

        selected
    }
}
