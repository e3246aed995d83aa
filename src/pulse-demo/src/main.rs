//! PulseTrack demo — composition root wiring a tracker against a dry-run
//! transport that logs every outbound batch instead of calling a backend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use pulse_core::config::TrackerConfig;
use pulse_core::signal::channel_sink;
use pulse_core::types::EventDraft;
use pulse_delivery::{HttpResponse, HttpTransport, TransportError};
use pulse_tracker::Tracker;

#[derive(Parser, Debug)]
#[command(name = "pulse-demo")]
#[command(about = "Durable event tracker demo: enqueue, batch, flush")]
#[command(version)]
struct Cli {
    /// Number of demo events to send
    #[arg(long, default_value_t = 25)]
    events: usize,

    /// Periodic flush interval in seconds (overrides config)
    #[arg(long, env = "PULSE__FLUSH_INTERVAL_SECS")]
    flush_interval_secs: Option<u64>,

    /// Journal file for durable queueing (overrides config)
    #[arg(long, env = "PULSE__JOURNAL_PATH")]
    journal: Option<PathBuf>,
}

/// Transport that accepts every batch and logs it.
struct DryRunTransport;

#[async_trait]
impl HttpTransport for DryRunTransport {
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: serde_json::Value,
        _headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, TransportError> {
        let count = body["events"].as_array().map_or(0, Vec::len);
        info!(method, path, count, "dry-run batch accepted");
        Ok(HttpResponse::with_status(200))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=info,pulse_demo=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = TrackerConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TrackerConfig::default()
    });
    if let Some(secs) = cli.flush_interval_secs {
        config.flush_interval_secs = secs;
    }
    if let Some(path) = cli.journal {
        config.journal_path = Some(path);
    }

    let (signals, mut signal_stream) = channel_sink();
    let tracker = Tracker::builder(config, Arc::new(DryRunTransport))
        .with_signal_sink(signals)
        .build();

    tokio::spawn(async move {
        while let Some(signal) = signal_stream.recv().await {
            info!(?signal, "tracker signal");
        }
    });

    tracker.set_custom_identifier(Some("demo-customer".into()));
    tracker.set_custom_email(Some("demo@example.com".into()));

    for i in 0..cli.events {
        tracker.send(
            EventDraft::custom("demo.event")
                .with_param("sequence", i as u64)
                .with_param("source", "pulse-demo"),
        )?;
    }
    info!(events = cli.events, "events enqueued");

    let report = tracker.flush_events().await?;
    info!(
        delivered = report.delivered,
        dropped = report.dropped,
        "flush complete"
    );

    tracker.shutdown().await;
    Ok(())
}
