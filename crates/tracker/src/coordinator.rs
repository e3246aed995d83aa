//! Flush coordinator — owns the drain schedule and the retry/backoff
//! policy. A single task drains the queue, so at most one delivery is in
//! flight at any time; concurrent triggers coalesce into the running drain
//! instead of spawning parallel sends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use pulse_core::config::{RetryPolicy, TrackerConfig};
use pulse_core::error::{DeliveryError, TrackerError};
use pulse_core::signal::{DropReason, SignalSink, TrackerSignal};
use pulse_core::types::EventBatch;
use pulse_delivery::DeliveryClient;
use pulse_queue::{Batcher, EventQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Flushing,
    BackoffWaiting,
}

/// Terminal outcome of one triggered drain. Every completion registered
/// before the drain finished receives the same report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub dropped: usize,
    /// Shutdown interrupted the drain; undelivered events stay queued.
    pub aborted: bool,
}

enum Command {
    Flush(oneshot::Sender<FlushReport>),
    EventEnqueued,
    Shutdown,
}

/// Cheap cloneable handle for talking to the coordinator task.
#[derive(Clone)]
pub struct FlushHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl FlushHandle {
    /// Nudge the coordinator after an enqueue. Drains once the queue depth
    /// reaches the configured threshold; never blocks the caller.
    pub fn notify_enqueued(&self) {
        let _ = self.commands.send(Command::EventEnqueued);
    }

    /// Force a drain. Resolves once the triggered drain completes, whatever
    /// the outcome — callers never hang on a failed flush.
    pub async fn flush(&self) -> Result<FlushReport, TrackerError> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Flush(done))
            .map_err(|_| TrackerError::Shutdown)?;
        wait.await.map_err(|_| TrackerError::Shutdown)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

enum WaitOutcome {
    Elapsed,
    Preempted,
    Shutdown,
}

pub struct FlushCoordinator {
    queue: Arc<EventQueue>,
    batcher: Batcher,
    client: DeliveryClient,
    policy: RetryPolicy,
    flush_threshold: usize,
    flush_interval: Duration,
    signals: Arc<dyn SignalSink>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: FlushState,
    completions: Vec<oneshot::Sender<FlushReport>>,
}

impl FlushCoordinator {
    pub fn new(
        queue: Arc<EventQueue>,
        client: DeliveryClient,
        config: &TrackerConfig,
        signals: Arc<dyn SignalSink>,
    ) -> (Self, FlushHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                queue,
                batcher: Batcher::from_config(config),
                client,
                policy: config.retry.clone(),
                flush_threshold: config.flush_threshold,
                flush_interval: config.flush_interval(),
                signals,
                commands: receiver,
                state: FlushState::Idle,
                completions: Vec::new(),
            },
            FlushHandle { commands: sender },
        )
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        // First tick after one full interval; an immediate tick would race
        // explicit flush triggers at startup.
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.flush_interval,
            self.flush_interval,
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Flush(done)) => {
                        self.completions.push(done);
                        if !self.drain().await {
                            return;
                        }
                    }
                    Some(Command::EventEnqueued) => {
                        if self.queue.len() >= self.flush_threshold && !self.drain().await {
                            return;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        debug!("flush coordinator stopping");
                        return;
                    }
                },
                _ = interval.tick() => {
                    if !self.queue.is_empty() && !self.drain().await {
                        return;
                    }
                }
            }
        }
    }

    /// Drain the queue batch by batch until it is empty or shutdown
    /// interrupts. Returns false on shutdown.
    async fn drain(&mut self) -> bool {
        self.transition(FlushState::Flushing);
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        let mut keep_running = true;

        'batches: while keep_running {
            let entries = self.queue.peek_batch(&self.batcher);
            if entries.is_empty() {
                break;
            }
            // Membership is frozen for every attempt on this batch; events
            // enqueued from here on wait for the next batch.
            let mut batch = EventBatch::new(entries);
            let ids = batch.entry_ids();

            loop {
                match self.client.send(&batch).await {
                    Ok(ack) => {
                        self.queue.ack(&ids);
                        delivered += ack.accepted;
                        metrics::counter!("tracker.events_delivered")
                            .increment(ack.accepted as u64);
                        continue 'batches;
                    }
                    Err(DeliveryError::Rejected { status }) => {
                        // Non-retryable: drop rather than livelock on a
                        // poison batch.
                        self.queue.ack(&ids);
                        dropped += batch.len();
                        warn!(
                            batch_id = %batch.batch_id,
                            status,
                            count = batch.len(),
                            "batch rejected, dropped without retry"
                        );
                        self.report_drop(&batch, DropReason::Rejected);
                        continue 'batches;
                    }
                    Err(error) => {
                        let reason = error.to_string();
                        self.queue.requeue(&ids, &reason);
                        for entry in &mut batch.entries {
                            entry.attempts += 1;
                            entry.last_failure = Some(reason.clone());
                        }
                        let attempts = batch.attempts();

                        if error == DeliveryError::AuthExpired {
                            if let Err(e) = self.client.refresh_auth().await {
                                warn!(error = %e, "session token refresh failed");
                            }
                        }

                        if attempts >= self.policy.max_attempts {
                            self.queue.ack(&ids);
                            dropped += batch.len();
                            warn!(
                                batch_id = %batch.batch_id,
                                attempts,
                                count = batch.len(),
                                "retry budget exhausted, dropping batch"
                            );
                            self.report_drop(&batch, DropReason::RetriesExhausted);
                            continue 'batches;
                        }

                        let delay = self.policy.backoff_for_attempt(attempts - 1);
                        match self.backoff_wait(delay).await {
                            WaitOutcome::Shutdown => {
                                keep_running = false;
                                break 'batches;
                            }
                            WaitOutcome::Elapsed | WaitOutcome::Preempted => {
                                self.transition(FlushState::Flushing);
                            }
                        }
                    }
                }
            }
        }

        self.transition(FlushState::Idle);
        let report = FlushReport {
            delivered,
            dropped,
            aborted: !keep_running,
        };
        if report.delivered > 0 || report.dropped > 0 {
            info!(
                delivered = report.delivered,
                dropped = report.dropped,
                aborted = report.aborted,
                "drain finished"
            );
        }
        self.finish(report);
        keep_running
    }

    /// Wait out the backoff delay. An explicit flush preempts the wait (its
    /// completion joins the current drain); enqueue nudges do not.
    async fn backoff_wait(&mut self, delay: Duration) -> WaitOutcome {
        self.transition(FlushState::BackoffWaiting);
        debug!(delay_ms = delay.as_millis() as u64, "backing off before retry");
        let deadline = tokio::time::Instant::now() + delay;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::Elapsed,
                command = self.commands.recv() => match command {
                    Some(Command::Flush(done)) => {
                        self.completions.push(done);
                        return WaitOutcome::Preempted;
                    }
                    Some(Command::EventEnqueued) => continue,
                    Some(Command::Shutdown) | None => return WaitOutcome::Shutdown,
                }
            }
        }
    }

    fn report_drop(&self, batch: &EventBatch, reason: DropReason) {
        metrics::counter!("tracker.batches_dropped").increment(1);
        self.signals.publish(TrackerSignal::BatchDropped {
            batch_id: batch.batch_id,
            entry_count: batch.len(),
            reason,
        });
    }

    fn transition(&mut self, next: FlushState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "flush state");
            self.state = next;
        }
    }

    fn finish(&mut self, report: FlushReport) {
        for done in self.completions.drain(..) {
            let _ = done.send(report);
        }
    }
}
