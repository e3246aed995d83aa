//! Public tracker surface — cache-and-enqueue event sending with explicit
//! flush, in front of the durable queue and the flush coordinator.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use pulse_core::config::TrackerConfig;
use pulse_core::error::{StorageError, TrackerError};
use pulse_core::signal::{noop_sink, SignalSink, TrackerSignal};
use pulse_core::types::{EventDraft, QueueEntry, TrackerEvent};
use pulse_delivery::{DeliveryClient, HttpTransport, TokenProvider, TransportError};
use pulse_queue::{EventQueue, QueueStats};

use crate::coordinator::{FlushCoordinator, FlushHandle, FlushReport};
use crate::identity::IdentityContext;

/// Auth collaborator that obtains a fresh session token when the current
/// one expires.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_session(&self) -> Result<String, TransportError>;
}

/// Bridges the identity context and the refresh collaborator into the
/// delivery client's token seam: tokens are read from (and refreshed into)
/// the identity context.
struct SessionTokenSource {
    identity: Arc<IdentityContext>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

#[async_trait]
impl TokenProvider for SessionTokenSource {
    fn token(&self) -> Option<String> {
        self.identity.session_token()
    }

    async fn refresh(&self) -> Result<(), TransportError> {
        let refresher = self.refresher.as_ref().ok_or_else(|| {
            TransportError::Network("no session refresher configured".to_string())
        })?;
        let token = refresher.refresh_session().await?;
        self.identity.set_session_token(Some(token));
        Ok(())
    }
}

pub struct TrackerBuilder {
    config: TrackerConfig,
    transport: Arc<dyn HttpTransport>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    signals: Arc<dyn SignalSink>,
}

impl TrackerBuilder {
    pub fn with_token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_signal_sink(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = signals;
        self
    }

    /// Wire queue, delivery client, and coordinator, and spawn the worker.
    pub fn build(self) -> Tracker {
        let identity = Arc::new(IdentityContext::new());
        let queue = Arc::new(EventQueue::open(&self.config, self.signals.clone()));
        let auth = Arc::new(SessionTokenSource {
            identity: identity.clone(),
            refresher: self.refresher,
        });
        let client = DeliveryClient::new(self.transport, auth, &self.config);
        let (coordinator, handle) =
            FlushCoordinator::new(queue.clone(), client, &self.config, self.signals.clone());
        let worker = coordinator.spawn();

        info!(
            flush_interval_secs = self.config.flush_interval_secs,
            flush_threshold = self.config.flush_threshold,
            persistent = queue.stats().persistent,
            "tracker started"
        );

        Tracker {
            identity,
            queue,
            handle,
            signals: self.signals,
            enable_location_tracking: self.config.enable_location_tracking,
            location_update_interval: self.config.location_update_interval(),
            last_location_request: Mutex::new(None),
            worker,
        }
    }
}

pub struct Tracker {
    identity: Arc<IdentityContext>,
    queue: Arc<EventQueue>,
    handle: FlushHandle,
    signals: Arc<dyn SignalSink>,
    enable_location_tracking: bool,
    location_update_interval: std::time::Duration,
    last_location_request: Mutex<Option<Instant>>,
    worker: tokio::task::JoinHandle<()>,
}

impl Tracker {
    pub fn builder(config: TrackerConfig, transport: Arc<dyn HttpTransport>) -> TrackerBuilder {
        TrackerBuilder {
            config,
            transport,
            refresher: None,
            signals: noop_sink(),
        }
    }

    pub fn set_custom_identifier(&self, value: Option<String>) {
        self.identity.set_custom_identifier(value);
    }

    pub fn set_custom_email(&self, value: Option<String>) {
        self.identity.set_custom_email(value);
    }

    pub fn set_session_token(&self, value: Option<String>) {
        self.identity.set_session_token(value);
    }

    /// Destroy the session: identity wiped, anonymous id rotated. Applies
    /// prospectively; already-queued events keep their frozen identity.
    pub fn sign_out(&self) {
        self.identity.clear();
    }

    /// Cache-and-enqueue an event for eventual delivery. Never blocks on
    /// the network and never reports delivery failures — those surface
    /// through the signal sink and the `flush_events` report.
    pub fn send(&self, draft: EventDraft) -> Result<QueueEntry, StorageError> {
        let event = TrackerEvent {
            id: Uuid::new_v4(),
            event_type: draft.event_type,
            name: draft.name,
            params: draft.params,
            identity: self.identity.snapshot(),
            timestamp: Utc::now(),
        };

        let entry = self.queue.enqueue(event)?;
        self.handle.notify_enqueued();
        self.maybe_request_location_update();
        Ok(entry)
    }

    /// Force sending the queued events. Resolves once the triggered drain
    /// completes, no matter the result.
    pub async fn flush_events(&self) -> Result<FlushReport, TrackerError> {
        self.handle.flush().await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Stop the coordinator and wait for it to wind down. In-flight sends
    /// finish or time out; undelivered events stay queued (and journaled).
    pub async fn shutdown(self) {
        self.handle.shutdown();
        let _ = self.worker.await;
        debug!("tracker shut down");
    }

    fn maybe_request_location_update(&self) {
        if !self.enable_location_tracking {
            return;
        }
        let mut last = self.last_location_request.lock();
        let due = last.map_or(true, |at| at.elapsed() >= self.location_update_interval);
        if due {
            *last = Some(Instant::now());
            debug!("requesting location update to enrich outgoing events");
            self.signals.publish(TrackerSignal::LocationUpdateRequired);
        }
    }
}
