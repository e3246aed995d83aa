//! HTTP transport seam — the authenticated HTTP client is an external
//! collaborator; the tracker only depends on these traits.

use std::collections::HashMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl HttpResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            body: serde_json::Value::Null,
        }
    }
}

/// Authenticated HTTP client collaborator.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, TransportError>;
}

/// Supplies the bearer/session token and refreshes it on expiry.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
    async fn refresh(&self) -> Result<(), TransportError>;
}

/// Fixed-token provider for simple deployments and tests. `refresh` is a
/// no-op because the token never expires.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }

    async fn refresh(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// One request observed by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
    pub headers: HashMap<String, String>,
}

/// Scripted transport for tests: pops pre-programmed outcomes in order and
/// records every request. When the script runs dry it answers 200.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: u16) {
        self.script
            .lock()
            .push_back(Ok(HttpResponse::with_status(status)));
    }

    pub fn push_network_error(&self, detail: impl Into<String>) {
        self.script
            .lock()
            .push_back(Err(TransportError::Network(detail.into())));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: serde_json::Value,
        headers: &HashMap<String, String>,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(RecordedRequest {
            method: method.to_string(),
            path: path.to_string(),
            body,
            headers: headers.clone(),
        });
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::with_status(200)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_script_order() {
        let transport = MockTransport::new();
        transport.push_status(503);
        transport.push_network_error("connection reset");

        let headers = HashMap::new();
        let first = transport
            .request("POST", "/v1/events/batch", serde_json::json!({}), &headers)
            .await
            .unwrap();
        assert_eq!(first.status, 503);

        let second = transport
            .request("POST", "/v1/events/batch", serde_json::json!({}), &headers)
            .await;
        assert!(matches!(second, Err(TransportError::Network(_))));

        // Script exhausted: defaults to 200.
        let third = transport
            .request("POST", "/v1/events/batch", serde_json::json!({}), &headers)
            .await
            .unwrap();
        assert_eq!(third.status, 200);

        assert_eq!(transport.request_count(), 3);
        assert_eq!(transport.requests()[0].method, "POST");
    }

    #[tokio::test]
    async fn test_static_token_provider() {
        let provider = StaticTokenProvider::new("api-key-1");
        assert_eq!(provider.token().as_deref(), Some("api-key-1"));
        provider.refresh().await.unwrap();

        assert!(StaticTokenProvider::anonymous().token().is_none());
    }
}
