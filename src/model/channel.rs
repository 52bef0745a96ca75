//! Channel identifiers.
//!
//! A channel is one independently synchronized stream: a single market's
//! order-book diffs, or one of the global dashboard feeds.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Reserved id of the dashboard tweet feed.
pub const TWEETS_FEED: &str = "tweets";
/// Reserved id of the dashboard trading-activity feed.
pub const TRADES_FEED: &str = "trades";

/// What sort of stream a channel carries. Decides the ring capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Per-market diff stream, keyed by condition id.
    Market,
    /// Global dashboard feed (`tweets` or `trades`).
    Feed,
}

/// Opaque, cheaply clonable channel identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Channel for a single market.
    pub fn market(condition_id: impl AsRef<str>) -> Self {
        Self::new(condition_id)
    }

    pub fn tweets() -> Self {
        Self::new(TWEETS_FEED)
    }

    pub fn trades() -> Self {
        Self::new(TRADES_FEED)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> ChannelKind {
        match self.as_str() {
            TWEETS_FEED | TRADES_FEED => ChannelKind::Feed,
            _ => ChannelKind::Market,
        }
    }

    #[inline]
    pub fn is_market(&self) -> bool {
        self.kind() == ChannelKind::Market
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.as_str())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}
