use thiserror::Error;

use crate::model::channel::ChannelId;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to parse message: {0}")]
    Parse(String),

    #[error("Snapshot unavailable for {channel}: {reason}")]
    SnapshotUnavailable { channel: ChannelId, reason: String },

    #[error("Transport lost: {0}")]
    TransportLost(String),

    #[error("Gave up after {attempts} consecutive failed attempts")]
    PersistentFailure { attempts: u32 },

    #[error("Handshake rejected with HTTP 429")]
    RateLimited,

    #[error("WebSocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL")]
    Url(#[from] url::ParseError),

    #[error("Internal channel closed")]
    ChannelClosed,
}

impl SyncError {
    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        Self::Parse(reason.into())
    }

    pub(crate) fn snapshot(channel: &ChannelId, reason: impl ToString) -> Self {
        Self::SnapshotUnavailable {
            channel: channel.clone(),
            reason: reason.to_string(),
        }
    }
}
