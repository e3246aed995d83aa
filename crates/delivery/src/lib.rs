//! Batch delivery — the HTTP transport seam and the client that serializes
//! event batches and interprets ingestion responses.

pub mod client;
pub mod transport;

pub use client::DeliveryClient;
pub use transport::{
    HttpResponse, HttpTransport, MockTransport, StaticTokenProvider, TokenProvider,
    TransportError,
};
