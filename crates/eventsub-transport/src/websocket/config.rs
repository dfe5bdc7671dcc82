//! Session configuration.

use std::time::Duration;

/// Default EventSub WebSocket endpoint.
pub const EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws?keepalive_timeout_seconds=30";

/// Configuration for an EventSub session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Endpoint used for the first connection and after every failure.
    pub url: String,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// How long to wait for the welcome frame after connecting.
    pub welcome_timeout: Duration,
    /// Reconnect when no frame arrives within the session's keepalive
    /// timeout plus `keepalive_grace`.
    pub keepalive_watchdog: bool,
    /// Slack added to the server-announced keepalive timeout.
    pub keepalive_grace: Duration,
    /// Frames larger than this are dropped.
    pub max_message_size: usize,
    /// Capacity of the control channel.
    pub command_channel_capacity: usize,
    /// Capacity of the event channel.
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: EVENTSUB_WS_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            welcome_timeout: Duration::from_secs(10),
            keepalive_watchdog: true,
            keepalive_grace: Duration::from_secs(5),
            max_message_size: 1024 * 1024,
            command_channel_capacity: 8,
            event_channel_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the welcome timeout.
    #[must_use]
    pub fn welcome_timeout(mut self, timeout: Duration) -> Self {
        self.welcome_timeout = timeout;
        self
    }

    /// Enable or disable the keepalive watchdog.
    #[must_use]
    pub fn keepalive_watchdog(mut self, enabled: bool) -> Self {
        self.keepalive_watchdog = enabled;
        self
    }

    /// Set the keepalive grace period.
    #[must_use]
    pub fn keepalive_grace(mut self, grace: Duration) -> Self {
        self.keepalive_grace = grace;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| format!("Invalid URL: {e}"))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err("URL scheme must be ws or wss".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.welcome_timeout.is_zero() {
            return Err("Welcome timeout must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}
