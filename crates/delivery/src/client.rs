//! Delivery client — serializes an event batch into the ingestion payload,
//! issues one authenticated call, and classifies the response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use pulse_core::config::TrackerConfig;
use pulse_core::error::DeliveryError;
use pulse_core::types::{DeliveryAck, EventBatch};

use crate::transport::{HttpTransport, TokenProvider};

const INGEST_PATH: &str = "/v1/events/batch";

pub struct DeliveryClient {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn TokenProvider>,
    path: String,
    timeout: Duration,
}

impl DeliveryClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn TokenProvider>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            transport,
            auth,
            path: INGEST_PATH.to_string(),
            timeout: config.network_timeout(),
        }
    }

    /// Send one batch. The batch is immutable for the duration of the call;
    /// disposition of its entries is the caller's job.
    pub async fn send(&self, batch: &EventBatch) -> Result<DeliveryAck, DeliveryError> {
        let payload = Self::payload(batch);
        let headers = self.headers();

        let request = self
            .transport
            .request("POST", &self.path, payload, &headers);

        let response = match tokio::time::timeout(self.timeout, request).await {
            Err(_) => {
                return Err(DeliveryError::Transient(format!(
                    "delivery timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
            Ok(Err(e)) => return Err(DeliveryError::Transient(e.to_string())),
            Ok(Ok(response)) => response,
        };

        match response.status {
            200..=299 => {
                debug!(
                    batch_id = %batch.batch_id,
                    count = batch.len(),
                    "batch accepted by ingestion endpoint"
                );
                Ok(DeliveryAck {
                    batch_id: batch.batch_id,
                    accepted: batch.len(),
                })
            }
            401 => Err(DeliveryError::AuthExpired),
            status @ 400..=499 => {
                warn!(
                    batch_id = %batch.batch_id,
                    status,
                    count = batch.len(),
                    "batch rejected"
                );
                Err(DeliveryError::Rejected { status })
            }
            status => Err(DeliveryError::Transient(format!("server error {status}"))),
        }
    }

    /// Ask the token collaborator for a fresh session token.
    pub async fn refresh_auth(&self) -> Result<(), DeliveryError> {
        self.auth
            .refresh()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))
    }

    fn payload(batch: &EventBatch) -> serde_json::Value {
        let events: Vec<serde_json::Value> = batch
            .entries
            .iter()
            .map(|entry| {
                json!({
                    "id": entry.event.id,
                    "type": entry.event.event_type,
                    "name": entry.event.name,
                    "params": entry.event.params,
                    "timestamp": entry.event.timestamp,
                    "client": entry.event.identity,
                    "retry_count": entry.attempts,
                })
            })
            .collect();

        json!({
            "batch_id": batch.batch_id,
            "events": events,
        })
    }

    fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(token) = self.auth.token() {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, StaticTokenProvider};
    use chrono::Utc;
    use pulse_core::types::{
        IdentitySnapshot, QueueEntry, TrackerEvent, TrackerEventType,
    };
    use uuid::Uuid;

    fn make_batch(count: usize) -> EventBatch {
        let now = Utc::now();
        let entries = (0..count)
            .map(|i| QueueEntry {
                entry_id: i as u64 + 1,
                event: TrackerEvent {
                    id: Uuid::new_v4(),
                    event_type: TrackerEventType::Purchase,
                    name: Some(format!("purchase-{i}")),
                    params: std::collections::HashMap::new(),
                    identity: IdentitySnapshot {
                        custom_identifier: Some("cust-42".into()),
                        custom_email: None,
                        anonymous_id: Uuid::new_v4(),
                    },
                    timestamp: now,
                },
                payload_bytes: 128,
                enqueued_at: now,
                attempts: 1,
                last_attempt_at: None,
                last_failure: None,
            })
            .collect();
        EventBatch::new(entries)
    }

    fn client_with(transport: Arc<MockTransport>) -> DeliveryClient {
        DeliveryClient::new(
            transport,
            Arc::new(StaticTokenProvider::new("session-token")),
            &TrackerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_success_acks_all_entries() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(200);
        let client = client_with(transport.clone());

        let batch = make_batch(3);
        let ack = client.send(&batch).await.unwrap();
        assert_eq!(ack.batch_id, batch.batch_id);
        assert_eq!(ack.accepted, 3);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(401);
        transport.push_status(400);
        transport.push_status(503);
        transport.push_network_error("connection refused");
        let client = client_with(transport.clone());

        let batch = make_batch(1);
        assert_eq!(
            client.send(&batch).await.unwrap_err(),
            DeliveryError::AuthExpired
        );
        assert_eq!(
            client.send(&batch).await.unwrap_err(),
            DeliveryError::Rejected { status: 400 }
        );
        assert!(matches!(
            client.send(&batch).await.unwrap_err(),
            DeliveryError::Transient(_)
        ));
        assert!(matches!(
            client.send(&batch).await.unwrap_err(),
            DeliveryError::Transient(_)
        ));
    }

    #[tokio::test]
    async fn test_payload_carries_frozen_identity_and_attempts() {
        let transport = Arc::new(MockTransport::new());
        let client = client_with(transport.clone());

        let batch = make_batch(2);
        client.send(&batch).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/v1/events/batch");
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer session-token")
        );

        let events = request.body["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["client"]["custom_identifier"], "cust-42");
        assert_eq!(events[0]["retry_count"], 1);
        assert_eq!(events[0]["type"], "purchase");
    }

    #[tokio::test]
    async fn test_anonymous_client_sends_no_auth_header() {
        let transport = Arc::new(MockTransport::new());
        let client = DeliveryClient::new(
            transport.clone(),
            Arc::new(StaticTokenProvider::anonymous()),
            &TrackerConfig::default(),
        );

        client.send(&make_batch(1)).await.unwrap();
        assert!(!transport.requests()[0].headers.contains_key("Authorization"));
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        struct StuckTransport;

        #[async_trait::async_trait]
        impl HttpTransport for StuckTransport {
            async fn request(
                &self,
                _method: &str,
                _path: &str,
                _body: serde_json::Value,
                _headers: &HashMap<String, String>,
            ) -> Result<crate::transport::HttpResponse, crate::transport::TransportError>
            {
                std::future::pending().await
            }
        }

        let config = TrackerConfig {
            network_timeout_ms: 20,
            ..TrackerConfig::default()
        };
        let client = DeliveryClient::new(
            Arc::new(StuckTransport),
            Arc::new(StaticTokenProvider::anonymous()),
            &config,
        );

        let err = client.send(&make_batch(1)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transient(_)));
    }
}
