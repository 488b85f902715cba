//! In-process transport that records sends instead of delivering them.
//!
//! Used for local dry runs (`TRANSPORT=memory`) and as the test double for the
//! engine and API crates. The fault and event-injection knobs are only built
//! with the `test-util` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use courier_common::types::SessionEvent;

use crate::{MessagingTransport, TransportError};

/// A message accepted by the memory transport.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub address: String,
    pub body: String,
    pub sent_at: Instant,
}

#[derive(Default)]
pub struct MemoryTransport {
    events: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    sent: Mutex<Vec<SentMessage>>,
    /// Number of `send_message` calls, successful or not.
    attempts: AtomicUsize,
    destroy_calls: AtomicUsize,
    /// Sends currently inside `send_message`, and the highest value seen.
    active_sends: AtomicUsize,
    max_active_sends: AtomicUsize,
    fail_sends: AtomicBool,
    auto_ready: bool,
    send_latency: Option<Duration>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `Authenticated` then `Ready` as soon as the session is initialized.
    pub fn auto_ready(mut self) -> Self {
        self.auto_ready = true;
        self
    }

    /// Make every send take `latency` before completing.
    #[cfg(any(test, feature = "test-util"))]
    pub fn with_send_latency(mut self, latency: Duration) -> Self {
        self.send_latency = Some(latency);
        self
    }

    /// Make subsequent sends fail with `TransportError::Rejected`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Push a lifecycle event to the session owner. Returns `false` if the
    /// transport was never initialized or the receiver is gone.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn emit(&self, event: SessionEvent) -> bool {
        let sender = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `send_message` calls observed running at once.
    pub fn max_concurrent_sends(&self) -> usize {
        self.max_active_sends.load(Ordering::SeqCst)
    }

    async fn record_send(&self, address: &str, body: &str) -> Result<(), TransportError> {
        if let Some(latency) = self.send_latency {
            tokio::time::sleep(latency).await;
        }

        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                status: 500,
                body: "simulated failure".to_string(),
            });
        }

        tracing::info!(address, chars = body.chars().count(), "Memory transport accepted message");

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                address: address.to_string(),
                body: body.to_string(),
                sent_at: Instant::now(),
            });
        Ok(())
    }
}

#[async_trait]
impl MessagingTransport for MemoryTransport {
    async fn initialize(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), TransportError> {
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events.clone());

        if self.auto_ready {
            for event in [SessionEvent::Authenticated, SessionEvent::Ready] {
                events.send(event).await.map_err(|_| TransportError::Closed)?;
            }
        }
        Ok(())
    }

    async fn send_message(&self, address: &str, body: &str) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let active = self.active_sends.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_sends.fetch_max(active, Ordering::SeqCst);

        let result = self.record_send(address, body).await;
        self.active_sends.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
