//! Integration test for the full enqueue → flush → ack flow, including
//! journal persistence across a tracker restart.

use std::sync::Arc;

use pulse_core::config::{RetryPolicy, TrackerConfig};
use pulse_core::signal::{capture_sink, SignalSink, TrackerSignal};
use pulse_core::types::EventDraft;
use pulse_delivery::MockTransport;
use pulse_tracker::Tracker;

fn test_config() -> TrackerConfig {
    TrackerConfig {
        flush_interval_secs: 3_600,
        flush_threshold: 1_000,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..TrackerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_events_one_batch_one_completion() {
    let transport = Arc::new(MockTransport::new());
    let tracker = Tracker::builder(test_config(), transport.clone()).build();

    tracker.send(EventDraft::custom("view")).unwrap();
    tracker.send(EventDraft::custom("click")).unwrap();
    tracker.send(EventDraft::custom("purchase")).unwrap();

    let report = tracker.flush_events().await.unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(report.dropped, 0);
    assert!(!report.aborted);

    assert_eq!(tracker.queue_stats().depth, 0);
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body["events"].as_array().unwrap().len(), 3);

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_batch_reports_drop_of_size_one() {
    let transport = Arc::new(MockTransport::new());
    transport.push_status(400);

    let sink = capture_sink();
    let tracker = Tracker::builder(test_config(), transport.clone())
        .with_signal_sink(sink.clone() as Arc<dyn SignalSink>)
        .build();

    tracker.send(EventDraft::custom("malformed")).unwrap();
    let report = tracker.flush_events().await.unwrap();

    assert_eq!(report.delivered, 0);
    assert_eq!(report.dropped, 1);
    assert_eq!(tracker.queue_stats().depth, 0);
    assert_eq!(transport.request_count(), 1);

    let drop_sizes: Vec<usize> = sink
        .signals()
        .into_iter()
        .filter_map(|s| match s {
            TrackerSignal::BatchDropped { entry_count, .. } => Some(entry_count),
            _ => None,
        })
        .collect();
    assert_eq!(drop_sizes, vec![1]);

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_undelivered_events_survive_restart() {
    let journal = std::env::temp_dir().join(format!(
        "pulse-flow-test-{}.journal",
        uuid::Uuid::new_v4()
    ));
    let config = TrackerConfig {
        journal_path: Some(journal.clone()),
        ..test_config()
    };

    // First run: the backend rejects nothing but we never flush.
    {
        let transport = Arc::new(MockTransport::new());
        let tracker = Tracker::builder(config.clone(), transport.clone()).build();
        tracker.send(EventDraft::custom("offline-1")).unwrap();
        tracker.send(EventDraft::custom("offline-2")).unwrap();
        tracker.shutdown().await;
        assert_eq!(transport.request_count(), 0);
    }

    // Second run: the journal restores the backlog and a flush delivers it.
    let transport = Arc::new(MockTransport::new());
    let tracker = Tracker::builder(config, transport.clone()).build();
    assert_eq!(tracker.queue_stats().depth, 2);

    let report = tracker.flush_events().await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(tracker.queue_stats().depth, 0);

    let events = transport.requests()[0].body["events"].as_array().unwrap().clone();
    assert_eq!(events[0]["name"], "offline-1");
    assert_eq!(events[1]["name"], "offline-2");

    tracker.shutdown().await;
    let _ = std::fs::remove_file(&journal);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_do_not_lose_or_duplicate_events() {
    let transport = Arc::new(MockTransport::new());
    transport.push_status(503);
    transport.push_status(503);

    let tracker = Tracker::builder(test_config(), transport.clone()).build();
    for i in 0..5 {
        tracker.send(EventDraft::custom(format!("e{i}"))).unwrap();
    }

    let report = tracker.flush_events().await.unwrap();
    assert_eq!(report.delivered, 5);
    assert_eq!(report.dropped, 0);
    assert_eq!(tracker.queue_stats().depth, 0);

    // Two failed attempts plus the successful one, same five events once.
    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    let delivered = requests.last().unwrap().body["events"].as_array().unwrap().len();
    assert_eq!(delivered, 5);

    tracker.shutdown().await;
}
