//! Engine configuration with tunable connection and retention limits.

use std::env;
use std::time::Duration;

use crate::model::channel::{ChannelId, ChannelKind};
use crate::network::backoff::BackoffPolicy;

/// Default market feed endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
/// Default snapshot backend.
pub const DEFAULT_SNAPSHOT_URL: &str = "http://localhost:5000";

/// Configuration for a [`SyncClient`](crate::SyncClient).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Push feed endpoint (ws:// or wss://)
    pub endpoint: String,
    /// Base URL of the snapshot REST backend
    pub snapshot_base_url: String,
    /// Consecutive failed attempts before a persistent failure (default: 5)
    pub max_reconnect_attempts: u32,
    /// First retry delay in milliseconds (default: 1000ms)
    pub backoff_base_ms: u64,
    /// Upper bound on any retry delay in milliseconds (default: 5000ms)
    pub backoff_cap_ms: u64,
    /// Ping interval in milliseconds (default: 15000ms)
    pub heartbeat_interval_ms: u64,
    /// Silence after which the link is declared lost (default: 30000ms)
    pub heartbeat_timeout_ms: u64,
    /// Wait after an HTTP 429 handshake rejection (default: 60000ms)
    pub rate_limit_cooldown_ms: u64,
    /// Ring capacity for market channels (default: 100)
    pub market_capacity: usize,
    /// Ring capacity for dashboard feed channels (default: 20)
    pub feed_capacity: usize,
    /// Bound of the session-to-engine message queue (default: 100)
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            snapshot_base_url: DEFAULT_SNAPSHOT_URL.to_string(),
            max_reconnect_attempts: 5,
            backoff_base_ms: 1000,
            backoff_cap_ms: 5000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 30_000,
            rate_limit_cooldown_ms: 60_000,
            market_capacity: 100,
            feed_capacity: 20,
            event_buffer: 100,
        }
    }
}

impl SyncConfig {
    /// Create a new config builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Defaults overridden by `MARKET_SYNC_*` environment variables.
    ///
    /// Unparseable numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `MARKET_SYNC_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = lookup("MARKET_SYNC_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(url) = lookup("MARKET_SYNC_SNAPSHOT_URL") {
            config.snapshot_base_url = url;
        }
        override_with(
            &lookup,
            "MARKET_SYNC_MAX_RECONNECT_ATTEMPTS",
            &mut config.max_reconnect_attempts,
        );
        override_with(&lookup, "MARKET_SYNC_BACKOFF_BASE_MS", &mut config.backoff_base_ms);
        override_with(&lookup, "MARKET_SYNC_BACKOFF_CAP_MS", &mut config.backoff_cap_ms);
        override_with(
            &lookup,
            "MARKET_SYNC_HEARTBEAT_INTERVAL_MS",
            &mut config.heartbeat_interval_ms,
        );
        override_with(
            &lookup,
            "MARKET_SYNC_HEARTBEAT_TIMEOUT_MS",
            &mut config.heartbeat_timeout_ms,
        );
        override_with(
            &lookup,
            "MARKET_SYNC_RATE_LIMIT_COOLDOWN_MS",
            &mut config.rate_limit_cooldown_ms,
        );
        override_with(&lookup, "MARKET_SYNC_MARKET_CAPACITY", &mut config.market_capacity);
        override_with(&lookup, "MARKET_SYNC_FEED_CAPACITY", &mut config.feed_capacity);
        override_with(&lookup, "MARKET_SYNC_EVENT_BUFFER", &mut config.event_buffer);
        config
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_cap_ms),
            self.max_reconnect_attempts,
        )
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }

    /// Ring capacity for a channel.
    pub fn capacity_for(&self, channel: &ChannelId) -> usize {
        match channel.kind() {
            ChannelKind::Market => self.market_capacity,
            ChannelKind::Feed => self.feed_capacity,
        }
    }
}

fn override_with<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!("Ignoring {}={:?}: not a valid number", key, raw),
        }
    }
}

/// Builder pattern for SyncConfig.
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn snapshot_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.snapshot_base_url = url.into();
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Set base and cap of the retry backoff, in milliseconds.
    pub fn backoff_ms(mut self, base: u64, cap: u64) -> Self {
        self.config.backoff_base_ms = base;
        self.config.backoff_cap_ms = cap;
        self
    }

    /// Set ping interval and silence timeout, in milliseconds.
    pub fn heartbeat_ms(mut self, interval: u64, timeout: u64) -> Self {
        self.config.heartbeat_interval_ms = interval;
        self.config.heartbeat_timeout_ms = timeout;
        self
    }

    pub fn rate_limit_cooldown_ms(mut self, cooldown: u64) -> Self {
        self.config.rate_limit_cooldown_ms = cooldown;
        self
    }

    pub fn market_capacity(mut self, capacity: usize) -> Self {
        self.config.market_capacity = capacity;
        self
    }

    pub fn feed_capacity(mut self, capacity: usize) -> Self {
        self.config.feed_capacity = capacity;
        self
    }

    pub fn event_buffer(mut self, size: usize) -> Self {
        self.config.event_buffer = size;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SyncConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.backoff_base_ms, 1000);
        assert_eq!(config.backoff_cap_ms, 5000);
        assert_eq!(config.market_capacity, 100);
        assert_eq!(config.feed_capacity, 20);
    }

    #[test]
    fn test_builder() {
        let config = SyncConfig::builder()
            .endpoint("ws://127.0.0.1:9000/ws")
            .backoff_ms(10, 50)
            .market_capacity(8)
            .build();

        assert_eq!(config.endpoint, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.backoff_cap_ms, 50);
        assert_eq!(config.market_capacity, 8);
        assert_eq!(config.feed_capacity, 20);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MARKET_SYNC_ENDPOINT", "ws://relay.local/ws"),
            ("MARKET_SYNC_MAX_RECONNECT_ATTEMPTS", "8"),
            ("MARKET_SYNC_RATE_LIMIT_COOLDOWN_MS", "1500"),
            ("MARKET_SYNC_FEED_CAPACITY", "lots"),
        ]
        .into_iter()
        .collect();
        let config = SyncConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.endpoint, "ws://relay.local/ws");
        assert_eq!(config.snapshot_base_url, DEFAULT_SNAPSHOT_URL);
        assert_eq!(config.max_reconnect_attempts, 8);
        assert_eq!(config.rate_limit_cooldown(), Duration::from_millis(1500));
        // unparseable values keep the default
        assert_eq!(config.feed_capacity, 20);
    }

    #[test]
    fn test_capacity_for_channel_kind() {
        let config = SyncConfig::default();
        assert_eq!(config.capacity_for(&ChannelId::market("0xabc")), 100);
        assert_eq!(config.capacity_for(&ChannelId::tweets()), 20);
    }
}
