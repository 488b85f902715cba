//! HTTP client for the messaging bridge sidecar.
//!
//! The bridge wraps the browser-driven messaging client and persists its login
//! state under `data_path`. Session lifecycle is learned by polling
//! `GET /session/state`; an event is emitted only when the reported status
//! changes. If the bridge is unreachable at start-up, the start call is
//! retried with backoff in the background and polling begins once it succeeds.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use courier_common::types::SessionEvent;

use crate::{MessagingTransport, TransportError};

/// Per-request timeout for bridge calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the wait between session start retries.
const MAX_START_BACKOFF: Duration = Duration::from_secs(30);

/// Session status as reported by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeStatus {
    Initializing,
    Qr {
        qr: String,
    },
    Authenticated,
    Ready,
    AuthFailure {
        #[serde(default)]
        reason: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
}

impl BridgeStatus {
    /// The lifecycle event this status corresponds to, if any.
    pub fn to_event(&self) -> Option<SessionEvent> {
        match self {
            BridgeStatus::Initializing => None,
            BridgeStatus::Qr { qr } => Some(SessionEvent::Challenge {
                payload: qr.clone(),
            }),
            BridgeStatus::Authenticated => Some(SessionEvent::Authenticated),
            BridgeStatus::Ready => Some(SessionEvent::Ready),
            BridgeStatus::AuthFailure { reason } => Some(SessionEvent::AuthFailure {
                reason: reason.clone(),
            }),
            BridgeStatus::Disconnected { reason } => Some(SessionEvent::Disconnected {
                reason: reason.clone(),
            }),
        }
    }
}

pub struct BridgeTransport {
    client: reqwest::Client,
    base_url: String,
    data_path: String,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeTransport {
    pub fn new(
        base_url: impl Into<String>,
        data_path: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            data_path: data_path.into(),
            poll_interval,
            poller: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch the current session status from the bridge.
    pub async fn fetch_status(&self) -> Result<BridgeStatus, TransportError> {
        fetch_status(&self.client, &self.url("/session/state")).await
    }
}

async fn fetch_status(client: &reqwest::Client, url: &str) -> Result<BridgeStatus, TransportError> {
    let response = check(client.get(url).send().await?).await?;
    Ok(response.json::<BridgeStatus>().await?)
}

/// Turn a non-2xx response into `TransportError::Rejected`.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Background half of a bridge session: starts it if needed, then polls.
struct SessionWorker {
    client: reqwest::Client,
    base_url: String,
    data_path: String,
    poll_interval: Duration,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionWorker {
    async fn start_session(&self) -> Result<(), TransportError> {
        check(
            self.client
                .post(format!("{}/session/start", self.base_url))
                .json(&json!({ "data_path": self.data_path }))
                .send()
                .await?,
        )
        .await?;

        tracing::info!(bridge = %self.base_url, data_path = %self.data_path, "Bridge session started");
        Ok(())
    }

    /// Returns `false` if the session owner went away before the bridge answered.
    async fn start_with_retry(&self) -> bool {
        let mut backoff = self.poll_interval;

        loop {
            tokio::time::sleep(backoff).await;
            if self.events.is_closed() {
                return false;
            }

            match self.start_session().await {
                Ok(()) => return true,
                Err(e) => {
                    backoff = (backoff * 2).min(MAX_START_BACKOFF);
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Bridge session start failed"
                    );
                }
            }
        }
    }

    async fn poll(self) {
        let url = format!("{}/session/state", self.base_url);
        let mut ticker = tokio::time::interval(self.poll_interval);
        let mut last: Option<BridgeStatus> = None;

        loop {
            ticker.tick().await;

            let status = match fetch_status(&self.client, &url).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::debug!(error = %e, "Bridge state poll failed, retrying");
                    continue;
                }
            };

            if last.as_ref() == Some(&status) {
                continue;
            }

            if let Some(event) = status.to_event() {
                tracing::debug!(event = %event, "Bridge reported session change");
                if self.events.send(event).await.is_err() {
                    tracing::debug!("Session event receiver dropped, stopping bridge poller");
                    return;
                }
            }
            last = Some(status);
        }
    }
}

#[async_trait]
impl MessagingTransport for BridgeTransport {
    async fn initialize(&self, events: mpsc::Sender<SessionEvent>) -> Result<(), TransportError> {
        let worker = SessionWorker {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            data_path: self.data_path.clone(),
            poll_interval: self.poll_interval,
            events,
        };

        // A failed first attempt is reported, but the worker keeps trying so
        // the session comes up once the bridge does.
        let result = worker.start_session().await;
        let handle = match &result {
            Ok(()) => tokio::spawn(worker.poll()),
            Err(_) => tokio::spawn(async move {
                if worker.start_with_retry().await {
                    worker.poll().await;
                }
            }),
        };

        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        result
    }

    async fn send_message(&self, address: &str, body: &str) -> Result<(), TransportError> {
        check(
            self.client
                .post(self.url("/messages"))
                .json(&json!({ "chat_id": address, "body": body }))
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            poller.abort();
        }

        check(
            self.client
                .post(self.url("/session/destroy"))
                .send()
                .await?,
        )
        .await?;

        tracing::info!(bridge = %self.base_url, "Bridge session destroyed");
        Ok(())
    }
}
