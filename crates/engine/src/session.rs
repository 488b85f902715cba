//! Session controller: owns the messaging transport and its lifecycle.
//!
//! Transport events are translated into [`SessionState`] transitions:
//!
//! | Event           | Resulting state                          | Challenge |
//! |-----------------|------------------------------------------|-----------|
//! | `Challenge`     | `AwaitingScan` (ignored once logged in)  | stored    |
//! | `Authenticated` | `Authenticated`                          | cleared   |
//! | `Ready`         | `Ready`                                  | cleared   |
//! | `AuthFailure`   | `Disconnected`                           | cleared   |
//! | `Disconnected`  | `Disconnected`                           | cleared   |
//!
//! Observers follow changes through a `watch` channel ([`SessionController::subscribe`]).
//! Sends hold a shared gate for the duration of the transport call; shutdown
//! takes it exclusively, so the transport is never destroyed under a send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{RwLock, mpsc, watch};

use courier_common::error::DeliveryError;
use courier_common::types::{SessionEvent, SessionSnapshot, SessionState};
use courier_notifier::MessagingTransport;

/// Capacity of the transport → controller event channel.
const EVENT_BUFFER: usize = 32;

pub struct SessionController {
    transport: Arc<dyn MessagingTransport>,
    snapshot: watch::Sender<SessionSnapshot>,
    /// `true` once the transport has been destroyed.
    torn_down: RwLock<bool>,
    /// Set with `torn_down`; stale events are ignored after shutdown.
    closed: AtomicBool,
}

impl SessionController {
    /// Create a controller in the `Initializing` state. Call [`start`](Self::start)
    /// to connect the transport.
    pub fn new(transport: Arc<dyn MessagingTransport>) -> Arc<Self> {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Arc::new(Self {
            transport,
            snapshot,
            torn_down: RwLock::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Begin establishing the session and route transport events into the
    /// transition table until the transport stops sending them.
    pub async fn start(self: &Arc<Self>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(pump_events(Arc::downgrade(self), rx));

        tracing::info!("Initializing messaging session");
        if let Err(e) = self.transport.initialize(tx).await {
            tracing::error!(error = %e, "Failed to initialize messaging session");
            self.apply(SessionEvent::Disconnected {
                reason: e.to_string(),
            });
        }
    }

    /// Apply one lifecycle event and return the state afterwards.
    pub fn apply(&self, event: SessionEvent) -> SessionState {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(event = %event, "Ignoring session event after shutdown");
            return self.state();
        }

        self.snapshot.send_if_modified(|current| {
            let next = match &event {
                SessionEvent::Challenge { .. } if current.state.is_authenticated() => {
                    tracing::debug!(state = %current.state, "Ignoring login challenge, already authenticated");
                    return false;
                }
                SessionEvent::Challenge { payload } => SessionSnapshot {
                    state: SessionState::AwaitingScan,
                    challenge: Some(payload.clone()),
                },
                SessionEvent::Authenticated => SessionSnapshot {
                    state: SessionState::Authenticated,
                    challenge: None,
                },
                SessionEvent::Ready => SessionSnapshot {
                    state: SessionState::Ready,
                    challenge: None,
                },
                SessionEvent::AuthFailure { .. } | SessionEvent::Disconnected { .. } => {
                    SessionSnapshot {
                        state: SessionState::Disconnected,
                        challenge: None,
                    }
                }
            };

            if *current == next {
                return false;
            }

            match &event {
                SessionEvent::AuthFailure { reason } => {
                    tracing::error!(from = %current.state, reason = %reason, "Messaging authentication failed");
                }
                SessionEvent::Disconnected { reason } => {
                    tracing::warn!(from = %current.state, reason = %reason, "Messaging session disconnected");
                }
                _ => {
                    tracing::info!(from = %current.state, to = %next.state, event = %event, "Session state changed");
                }
            }

            *current = next;
            true
        });

        self.state()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Pending login challenge, present only while awaiting a scan.
    pub fn challenge(&self) -> Option<String> {
        self.snapshot.borrow().challenge.clone()
    }

    /// Follow session changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Make a single delivery attempt. Fails with `NotReady` without touching
    /// the transport unless the session is `Ready`.
    pub async fn send(&self, address: &str, body: &str) -> Result<(), DeliveryError> {
        let torn_down = self.torn_down.read().await;

        let state = self.state();
        if *torn_down || state != SessionState::Ready {
            return Err(DeliveryError::NotReady { state });
        }

        self.transport
            .send_message(address, body)
            .await
            .map_err(|e| DeliveryError::DeliveryFailed(e.to_string()))
    }

    /// Destroy the transport session. Waits for an in-flight send; only the
    /// first call reaches the transport.
    pub async fn shutdown(&self) {
        let mut torn_down = self.torn_down.write().await;
        if *torn_down {
            return;
        }
        *torn_down = true;

        self.apply(SessionEvent::Disconnected {
            reason: "shutdown".to_string(),
        });
        self.closed.store(true, Ordering::SeqCst);

        match self.transport.destroy().await {
            Ok(()) => tracing::info!("Messaging session closed"),
            Err(e) => tracing::warn!(error = %e, "Messaging session teardown failed"),
        }
    }
}

async fn pump_events(controller: Weak<SessionController>, mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.apply(event);
    }
    tracing::debug!("Session event stream ended");
}
