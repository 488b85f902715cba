//! Outbound messaging transports.
//!
//! A transport owns the actual connection to the messaging backend. It reports
//! lifecycle changes as [`SessionEvent`]s on the channel handed to
//! [`MessagingTransport::initialize`] and performs single send attempts. It
//! knows nothing about queueing or pacing.

pub mod bridge;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use courier_common::types::SessionEvent;

pub use bridge::BridgeTransport;
pub use memory::MemoryTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport closed")]
    Closed,
}

#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Start establishing a session. Lifecycle events are pushed to `events`
    /// until the transport is destroyed or the receiver is dropped.
    async fn initialize(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), TransportError>;

    /// One delivery attempt to a normalized address. No retries.
    async fn send_message(&self, address: &str, body: &str) -> Result<(), TransportError>;

    /// Tear the session down.
    async fn destroy(&self) -> Result<(), TransportError>;
}
