//! Durable FIFO queue of pending events. The queue is the sole mutator of
//! persisted state: the flush coordinator borrows entries via `peek_batch`
//! and returns their disposition through `ack` or `requeue`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use pulse_core::config::TrackerConfig;
use pulse_core::error::StorageError;
use pulse_core::signal::{SignalSink, TrackerSignal};
use pulse_core::types::{QueueEntry, TrackerEvent};

use crate::batcher::Batcher;
use crate::journal::EventJournal;

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub depth: usize,
    pub bytes: usize,
    pub dropped_total: u64,
    /// False once the journal has failed or was never configured.
    pub persistent: bool,
}

struct QueueInner {
    entries: VecDeque<QueueEntry>,
    bytes: usize,
    next_entry_id: u64,
    journal: Option<EventJournal>,
}

impl QueueInner {
    /// Run a journal operation; a write failure drops the journal and the
    /// queue continues memory-only. Returns the failure detail, if any.
    fn journal_op(
        &mut self,
        op: impl FnOnce(&mut EventJournal) -> Result<(), StorageError>,
    ) -> Option<String> {
        let journal = self.journal.as_mut()?;
        match op(journal) {
            Ok(()) => None,
            Err(e) => {
                self.journal = None;
                Some(e.to_string())
            }
        }
    }

    fn maybe_compact(&mut self) -> Option<String> {
        let due = self.journal.as_ref().is_some_and(|j| j.should_compact());
        if !due {
            return None;
        }
        // Split borrow: compaction needs the live entries while holding the
        // journal mutably.
        let entries = &self.entries;
        match self.journal.as_mut() {
            Some(journal) => match journal.compact(entries.iter()) {
                Ok(()) => None,
                Err(e) => {
                    self.journal = None;
                    Some(e.to_string())
                }
            },
            None => None,
        }
    }
}

/// Bounded, optionally journal-backed event queue shared between the
/// tracker (enqueue side) and the flush coordinator (drain side).
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    max_entries: usize,
    max_bytes: usize,
    dropped: AtomicU64,
    signals: Arc<dyn SignalSink>,
}

impl EventQueue {
    /// Open the queue, attaching and replaying the journal when
    /// `config.journal_path` is set. A journal that cannot be opened is
    /// reported through the signal sink and the queue starts memory-only.
    pub fn open(config: &TrackerConfig, signals: Arc<dyn SignalSink>) -> Self {
        let (journal, entries, max_id) = match &config.journal_path {
            Some(path) => match EventJournal::open(path) {
                Ok((journal, entries, max_id)) => (Some(journal), entries, max_id),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "journal unavailable, queue is memory-only");
                    signals.publish(TrackerSignal::PersistenceDegraded {
                        detail: e.to_string(),
                    });
                    (None, Vec::new(), 0)
                }
            },
            None => (None, Vec::new(), 0),
        };

        let bytes = entries.iter().map(|e| e.payload_bytes).sum();
        let depth = entries.len();
        if depth > 0 {
            debug!(depth, bytes, "queue restored from journal");
        }

        Self {
            inner: Mutex::new(QueueInner {
                entries: entries.into(),
                bytes,
                next_entry_id: max_id + 1,
                journal,
            }),
            max_entries: config.max_queue_entries,
            max_bytes: config.max_queue_bytes,
            dropped: AtomicU64::new(0),
            signals,
        }
    }

    /// Memory-only queue, for tests and journal-less configurations.
    pub fn in_memory(config: &TrackerConfig, signals: Arc<dyn SignalSink>) -> Self {
        let mut config = config.clone();
        config.journal_path = None;
        Self::open(&config, signals)
    }

    /// Append an event in arrival order. Never blocks on network I/O; the
    /// only error path is the event failing to serialize. Capacity pressure
    /// evicts the oldest entries instead of failing the caller.
    pub fn enqueue(&self, event: TrackerEvent) -> Result<QueueEntry, StorageError> {
        let payload_bytes = serde_json::to_vec(&event)?.len();

        let mut evicted_ids = Vec::new();

        let (entry, degraded) = {
            let mut inner = self.inner.lock();
            let entry = QueueEntry {
                entry_id: inner.next_entry_id,
                event,
                payload_bytes,
                enqueued_at: Utc::now(),
                attempts: 0,
                last_attempt_at: None,
                last_failure: None,
            };
            inner.next_entry_id += 1;
            inner.bytes += payload_bytes;
            inner.entries.push_back(entry.clone());
            let mut degraded = inner.journal_op(|j| j.append(&entry));

            // Evict oldest-first to admit the new entry; a single oversized
            // entry is kept rather than evicting itself.
            while inner.entries.len() > 1
                && (inner.entries.len() > self.max_entries || inner.bytes > self.max_bytes)
            {
                if let Some(old) = inner.entries.pop_front() {
                    inner.bytes -= old.payload_bytes;
                    evicted_ids.push(old.entry_id);
                }
            }
            if !evicted_ids.is_empty() {
                degraded = degraded.or(inner.journal_op(|j| j.ack(&evicted_ids)));
            }

            (entry, degraded)
        };

        if !evicted_ids.is_empty() {
            let count = evicted_ids.len();
            self.dropped.fetch_add(count as u64, Ordering::Relaxed);
            metrics::counter!("tracker.events_evicted").increment(count as u64);
            warn!(count, "queue over capacity, oldest events evicted");
            self.signals.publish(TrackerSignal::EventsEvicted { count });
        }
        self.report_degraded(degraded);

        debug!(
            entry_id = entry.entry_id,
            event_type = ?entry.event.event_type,
            "event enqueued"
        );
        Ok(entry)
    }

    /// Oldest-first entries for the next batch, without removing them.
    /// Entries stay queued until acked (at-least-once delivery).
    pub fn peek_batch(&self, batcher: &Batcher) -> Vec<QueueEntry> {
        let inner = self.inner.lock();
        batcher.plan(inner.entries.iter())
    }

    /// Atomically remove the given entries. Idempotent: unknown ids are
    /// no-ops. Returns how many entries were actually removed.
    pub fn ack(&self, ids: &[u64]) -> usize {
        let mut degraded = None;
        let removed = {
            let mut inner = self.inner.lock();
            let before = inner.entries.len();
            let mut removed_bytes = 0usize;
            let mut removed_ids = Vec::new();
            inner.entries.retain(|e| {
                if ids.contains(&e.entry_id) {
                    removed_bytes += e.payload_bytes;
                    removed_ids.push(e.entry_id);
                    false
                } else {
                    true
                }
            });
            inner.bytes -= removed_bytes;
            if !removed_ids.is_empty() {
                degraded = inner.journal_op(|j| j.ack(&removed_ids));
                degraded = degraded.or(inner.maybe_compact());
            }
            before - inner.entries.len()
        };
        self.report_degraded(degraded);
        removed
    }

    /// Record a failed delivery attempt. Entries keep their FIFO position
    /// (ordering is by original enqueue time, not retry time).
    pub fn requeue(&self, ids: &[u64], failure_reason: &str) {
        let mut degraded = None;
        {
            let mut inner = self.inner.lock();
            let now = Utc::now();
            let mut touched = Vec::new();
            for entry in inner.entries.iter_mut().filter(|e| ids.contains(&e.entry_id)) {
                entry.attempts += 1;
                entry.last_attempt_at = Some(now);
                entry.last_failure = Some(failure_reason.to_string());
                touched.push(entry.entry_id);
            }
            if !touched.is_empty() {
                degraded = inner.journal_op(|j| j.requeue(&touched, failure_reason));
            }
        }
        self.report_degraded(degraded);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Total events evicted by capacity pressure since the queue opened.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            depth: inner.entries.len(),
            bytes: inner.bytes,
            dropped_total: self.dropped.load(Ordering::Relaxed),
            persistent: inner.journal.is_some(),
        }
    }

    fn report_degraded(&self, detail: Option<String>) {
        if let Some(detail) = detail {
            warn!(%detail, "journal write failed, queue is memory-only");
            self.signals
                .publish(TrackerSignal::PersistenceDegraded { detail });
        }
    }
}
