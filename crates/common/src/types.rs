use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the connection to the messaging backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    AwaitingScan,
    Authenticated,
    Ready,
    Disconnected,
}

impl SessionState {
    /// Whether a login has already succeeded in this state.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::AwaitingScan => write!(f, "awaiting_scan"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Lifecycle event reported by the messaging transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A login challenge (scan code) to show to the operator.
    Challenge { payload: String },
    Authenticated,
    /// The backend is fully operational and accepts sends.
    Ready,
    AuthFailure { reason: String },
    Disconnected { reason: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Challenge { .. } => write!(f, "challenge"),
            SessionEvent::Authenticated => write!(f, "authenticated"),
            SessionEvent::Ready => write!(f, "ready"),
            SessionEvent::AuthFailure { .. } => write!(f, "auth_failure"),
            SessionEvent::Disconnected { .. } => write!(f, "disconnected"),
        }
    }
}

/// Point-in-time view of the session, published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Pending login challenge; only present while `AwaitingScan`.
    pub challenge: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Initializing,
            challenge: None,
        }
    }
}

/// A delivery notification waiting in the dispatch queue.
///
/// `order_id` is a correlation string only; duplicates are not merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedMessage {
    /// Normalized messaging address (digits plus transport suffix)
    pub phone: String,
    /// Rendered message text
    pub body: String,
    pub order_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(phone: String, body: String, order_id: String) -> Self {
        Self {
            phone,
            body,
            order_id,
            enqueued_at: Utc::now(),
        }
    }
}

/// Where a message landed when it was enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    /// 1-based position at the moment of insertion
    pub position: usize,
    /// Queue length immediately after insertion
    pub queue_len: usize,
}
