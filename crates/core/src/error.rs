use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Local persistence failure. Surfaced to `enqueue` callers only; the queue
/// keeps operating memory-only when the journal becomes unavailable.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("journal corrupt: {0}")]
    Corrupt(String),
}

/// Classification of a single delivery attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network failure, timeout, or 5xx — the batch is requeued and retried.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// 401 — the session token is stale; refresh before the next retry.
    #[error("session token expired or unauthorized")]
    AuthExpired,

    /// Other 4xx — the batch is dropped, never retried.
    #[error("batch rejected by ingestion endpoint (status {status})")]
    Rejected { status: u16 },
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("tracker is shut down")]
    Shutdown,
}
