//! Snapshot loading.
//!
//! A snapshot is the point-in-time baseline for a channel. The engine loads
//! one before it trusts any live diff, and again after every reconnect.

mod http;

pub use http::HttpSnapshotLoader;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;
use crate::model::channel::ChannelId;
use crate::model::event::UpdateEvent;

/// Initial state of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub channel: ChannelId,
    /// Seed events, oldest first.
    pub events: Vec<UpdateEvent>,
    /// Opaque market metadata (question, outcomes, tokens...).
    pub details: Option<Value>,
}

impl Snapshot {
    pub fn new(channel: ChannelId, events: Vec<UpdateEvent>) -> Self {
        Self {
            channel,
            events,
            details: None,
        }
    }
}

/// Source of channel baselines.
///
/// Calling it twice is safe and simply re-fetches; nothing is cached.
#[async_trait]
pub trait SnapshotLoader: Send + Sync + 'static {
    async fn load_snapshot(&self, channel: &ChannelId) -> Result<Snapshot, SyncError>;
}
