//! File-backed append journal for the durable queue.
//!
//! JSON-lines format, one record per line: entry appends, multi-id acks,
//! and requeues. A single ack record removes any number of entries
//! atomically. Compaction rewrites the file through a temp-file rename once
//! enough records have accumulated.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pulse_core::error::StorageError;
use pulse_core::types::QueueEntry;

/// Records written since the last compaction before the queue rewrites the
/// journal down to its live entries.
const COMPACT_AFTER_RECORDS: usize = 512;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Append { entry: QueueEntry },
    Ack { ids: Vec<u64> },
    Requeue { ids: Vec<u64>, reason: String },
}

pub struct EventJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    records_since_compaction: usize,
}

impl EventJournal {
    /// Open the journal and replay it. Returns the surviving entries in
    /// original enqueue order plus the highest entry id ever written —
    /// including acked entries, so a restart never reuses an id.
    pub fn open(path: &Path) -> Result<(Self, Vec<QueueEntry>, u64), StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut entries: Vec<QueueEntry> = Vec::new();
        let mut max_entry_id = 0u64;
        let mut records = 0usize;
        let mut missing_newline = false;

        if path.exists() {
            let bytes = fs::read(path)?;
            let contents = String::from_utf8_lossy(&bytes);
            // Byte length of the well-formed prefix; valid records are
            // valid UTF-8, so the lossy view matches the file byte-for-byte
            // up to the first unreadable record.
            let mut valid_len = 0u64;
            for (index, chunk) in contents.split_inclusive('\n').enumerate() {
                let line = chunk.trim_end();
                if line.is_empty() {
                    valid_len += chunk.len() as u64;
                    continue;
                }
                let record: JournalRecord = match serde_json::from_str(line) {
                    Ok(record) => record,
                    Err(e) => {
                        // An unreadable record is a crash-truncated tail;
                        // everything before it replays normally.
                        warn!(
                            line = index + 1,
                            error = %e,
                            "journal replay stopped at unreadable record"
                        );
                        break;
                    }
                };
                valid_len += chunk.len() as u64;
                missing_newline = !chunk.ends_with('\n');
                records += 1;
                match record {
                    JournalRecord::Append { entry } => {
                        max_entry_id = max_entry_id.max(entry.entry_id);
                        entries.push(entry);
                    }
                    JournalRecord::Ack { ids } => {
                        entries.retain(|e| !ids.contains(&e.entry_id));
                    }
                    JournalRecord::Requeue { ids, reason } => {
                        for entry in entries.iter_mut().filter(|e| ids.contains(&e.entry_id)) {
                            entry.attempts += 1;
                            entry.last_failure = Some(reason.clone());
                        }
                    }
                }
            }

            // Drop the torn tail so later appends start on a fresh line
            // instead of gluing onto garbage that would poison the next
            // replay.
            if valid_len < bytes.len() as u64 {
                warn!(
                    path = %path.display(),
                    discarded = bytes.len() as u64 - valid_len,
                    "truncating torn journal tail"
                );
                OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if missing_newline {
            // The last record parsed but the crash ate its newline.
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        debug!(
            path = %path.display(),
            replayed = entries.len(),
            "journal opened"
        );

        Ok((
            Self {
                path: path.to_path_buf(),
                writer,
                records_since_compaction: records,
            },
            entries,
            max_entry_id,
        ))
    }

    pub fn append(&mut self, entry: &QueueEntry) -> Result<(), StorageError> {
        self.write_record(&JournalRecord::Append {
            entry: entry.clone(),
        })
    }

    pub fn ack(&mut self, ids: &[u64]) -> Result<(), StorageError> {
        self.write_record(&JournalRecord::Ack { ids: ids.to_vec() })
    }

    pub fn requeue(&mut self, ids: &[u64], reason: &str) -> Result<(), StorageError> {
        self.write_record(&JournalRecord::Requeue {
            ids: ids.to_vec(),
            reason: reason.to_string(),
        })
    }

    /// Whether enough records have accumulated to warrant a rewrite.
    pub fn should_compact(&self) -> bool {
        self.records_since_compaction >= COMPACT_AFTER_RECORDS
    }

    /// Rewrite the journal to hold only the given live entries. The new file
    /// is written fully, then renamed over the old one, so a crash leaves
    /// either the old journal or the new one — never a torn file.
    pub fn compact<'a>(
        &mut self,
        live: impl IntoIterator<Item = &'a QueueEntry>,
    ) -> Result<(), StorageError> {
        self.writer.flush()?;

        let tmp_path = self.path.with_extension("journal.tmp");
        let mut tmp = BufWriter::new(File::create(&tmp_path)?);
        let mut live_count = 0usize;
        for entry in live {
            let record = JournalRecord::Append {
                entry: entry.clone(),
            };
            serde_json::to_writer(&mut tmp, &record)?;
            tmp.write_all(b"\n")?;
            live_count += 1;
        }
        tmp.flush()?;
        tmp.into_inner()
            .map_err(|e| StorageError::Io(e.into_error()))?
            .sync_all()?;

        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        // Rewritten live entries are baseline state, not pending records;
        // counting them would re-trigger compaction on every ack for a
        // deep queue.
        self.records_since_compaction = 0;

        debug!(path = %self.path.display(), live = live_count, "journal compacted");
        Ok(())
    }

    fn write_record(&mut self, record: &JournalRecord) -> Result<(), StorageError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records_since_compaction += 1;
        Ok(())
    }
}
