//! Hub subscriber settings.

use std::time::Duration;

/// Default hub endpoint.
pub const DEFAULT_HUB_URL: &str = "http://localhost:5000/status-keepalive-hub";

/// Hub method invoked after connecting.
pub const SUBSCRIBE_METHOD: &str = "SubscribeToStatus";

/// Server-to-client event rendered on the console.
pub const STATUS_EVENT: &str = "StatusUpdate";

/// Number of log lines kept per session.
pub const LOG_CAPACITY: usize = 50;

/// Environment variable names
pub mod env_vars {
    pub const HUB_URL: &str = "PLUGINHOST_HUB_URL";
    pub const SKIP_NEGOTIATION: &str = "PLUGINHOST_HUB_SKIP_NEGOTIATION";
}

/// Timeouts and intervals
pub mod timeouts {
    use std::time::Duration;

    pub const CONNECT: Duration = Duration::from_secs(10);
    pub const SUBSCRIBE: Duration = Duration::from_secs(5);
    pub const STOP: Duration = Duration::from_secs(5);
    pub const RELEASE: Duration = Duration::from_secs(2);
    /// How often the foreground loop reconciles connection state.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
    /// No frame from the server for this long means the connection is lost.
    pub const SERVER_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Delays before each automatic reconnect attempt.
pub const RECONNECT_DELAYS: [Duration; 4] = [
    Duration::from_secs(0),
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Settings for one subscription session.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub url: String,
    pub skip_negotiation: bool,
    pub connect_timeout: Duration,
    pub subscribe_timeout: Duration,
    pub stop_timeout: Duration,
    pub release_timeout: Duration,
    pub poll_interval: Duration,
    pub keepalive_interval: Duration,
    pub server_timeout: Duration,
    pub reconnect_delays: Vec<Duration>,
    pub log_capacity: usize,
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_HUB_URL.to_string(),
            skip_negotiation: false,
            connect_timeout: timeouts::CONNECT,
            subscribe_timeout: timeouts::SUBSCRIBE,
            stop_timeout: timeouts::STOP,
            release_timeout: timeouts::RELEASE,
            poll_interval: timeouts::POLL_INTERVAL,
            keepalive_interval: timeouts::KEEPALIVE_INTERVAL,
            server_timeout: timeouts::SERVER_TIMEOUT,
            reconnect_delays: RECONNECT_DELAYS.to_vec(),
            log_capacity: LOG_CAPACITY,
            channel_capacity: 256,
        }
    }
}

impl HubConfig {
    /// Defaults with the environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = std::env::var(env_vars::HUB_URL)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            config.url = url;
        }
        config.skip_negotiation = std::env::var(env_vars::SKIP_NEGOTIATION)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);
        config
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}
