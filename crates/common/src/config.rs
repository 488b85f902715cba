use std::time::Duration;

use serde::Deserialize;

/// Which messaging transport the service drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP bridge sidecar wrapping the real messaging client
    Bridge,
    /// In-process dry run that only logs messages
    Memory,
}

impl std::str::FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bridge" => Ok(TransportKind::Bridge),
            "memory" => Ok(TransportKind::Memory),
            other => Err(anyhow::anyhow!(
                "TRANSPORT must be 'bridge' or 'memory', got '{}'",
                other
            )),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listening port (default: 5000)
    pub port: u16,

    /// Minimum spacing between two outbound messages in milliseconds
    /// (default: 120000 = 2 minutes)
    pub message_delay_ms: u64,

    /// Messaging transport (default: bridge)
    pub transport: TransportKind,

    /// Base URL of the messaging bridge sidecar
    pub bridge_url: String,

    /// Directory where the bridge persists its login session
    pub session_data_path: String,

    /// How often the bridge session state is polled, in milliseconds (default: 2000)
    pub bridge_poll_interval_ms: u64,

    /// Base URL of the customer-facing order tracking site
    pub tracking_base_url: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid u16"))?,
            message_delay_ms: std::env::var("MESSAGE_DELAY_MS")
                .unwrap_or_else(|_| "120000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MESSAGE_DELAY_MS must be a valid u64"))?,
            transport: std::env::var("TRANSPORT")
                .unwrap_or_else(|_| "bridge".to_string())
                .parse()?,
            bridge_url: std::env::var("WHATSAPP_BRIDGE_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            session_data_path: std::env::var("WHATSAPP_SESSION_PATH")
                .unwrap_or_else(|_| "./whatsapp-session".to_string()),
            bridge_poll_interval_ms: std::env::var("BRIDGE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BRIDGE_POLL_INTERVAL_MS must be a valid u64"))?,
            tracking_base_url: std::env::var("TRACKING_BASE_URL")
                .unwrap_or_else(|_| "https://client-global-express.web.app".to_string()),
        })
    }

    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }

    pub fn bridge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bridge_poll_interval_ms)
    }

    /// Estimated wait in whole minutes (rounded up) for a message at the
    /// given 1-based queue position.
    pub fn delay_minutes_for(&self, position: usize) -> u64 {
        let ahead = position.saturating_sub(1) as u64;
        ahead.saturating_mul(self.message_delay_ms).div_ceil(60_000)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            message_delay_ms: 120_000,
            transport: TransportKind::Bridge,
            bridge_url: "http://localhost:3001".to_string(),
            session_data_path: "./whatsapp-session".to_string(),
            bridge_poll_interval_ms: 2000,
            tracking_base_url: "https://client-global-express.web.app".to_string(),
        }
    }
}
