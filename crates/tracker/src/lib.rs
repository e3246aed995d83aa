//! PulseTrack tracker — the public event-tracking surface: identity
//! context, durable enqueue, and the flush coordinator that batches,
//! delivers, and retries.

pub mod coordinator;
pub mod identity;
pub mod tracker;

pub use coordinator::{FlushCoordinator, FlushHandle, FlushReport, FlushState};
pub use identity::IdentityContext;
pub use tracker::{TokenRefresher, Tracker, TrackerBuilder};
