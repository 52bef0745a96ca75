use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::SyncError;
use crate::model::channel::{ChannelId, ChannelKind};
use crate::model::event::{now_ms, UpdateEvent};

use super::{Snapshot, SnapshotLoader};

/// Loads snapshots from the relay backend's REST API.
///
/// - market `m`: `GET {base}/api/market/{m}` → `{"details": {..}, "updates": [..]}`
/// - feeds: `GET {base}/api/recent` → `[event, ..]`, newest first
#[derive(Debug, Clone)]
pub struct HttpSnapshotLoader {
    client: reqwest::Client,
    base: Url,
}

impl HttpSnapshotLoader {
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, SyncError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(SyncError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json(&self, channel: &ChannelId, url: Url) -> Result<Value, SyncError> {
        debug!("Fetching snapshot for {} from {}", channel, url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::snapshot(channel, e))?;
        resp.json().await.map_err(|e| SyncError::snapshot(channel, e))
    }
}

#[async_trait]
impl SnapshotLoader for HttpSnapshotLoader {
    async fn load_snapshot(&self, channel: &ChannelId) -> Result<Snapshot, SyncError> {
        match channel.kind() {
            ChannelKind::Market => {
                let url = self.endpoint(&["api", "market", channel.as_str()]);
                let body = self.get_json(channel, url).await?;
                decode_market(channel, body, now_ms())
            }
            ChannelKind::Feed => {
                let url = self.endpoint(&["api", "recent"]);
                let body = self.get_json(channel, url).await?;
                decode_feed(channel, body, now_ms())
            }
        }
    }
}

pub(crate) fn decode_market(
    channel: &ChannelId,
    body: Value,
    received_at: u64,
) -> Result<Snapshot, SyncError> {
    let Value::Object(mut body) = body else {
        return Err(SyncError::snapshot(channel, "expected a JSON object"));
    };
    let updates = match body.remove("updates") {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => Vec::new(),
        Some(_) => return Err(SyncError::snapshot(channel, "`updates` is not an array")),
    };

    Ok(Snapshot {
        channel: channel.clone(),
        events: decode_entries(channel, updates, received_at),
        details: body.remove("details").filter(|d| !d.is_null()),
    })
}

pub(crate) fn decode_feed(
    channel: &ChannelId,
    body: Value,
    received_at: u64,
) -> Result<Snapshot, SyncError> {
    let Value::Array(mut items) = body else {
        return Err(SyncError::snapshot(channel, "expected a JSON array"));
    };
    // newest first on the wire
    items.reverse();
    Ok(Snapshot::new(channel.clone(), decode_entries(channel, items, received_at)))
}

fn decode_entries(channel: &ChannelId, items: Vec<Value>, received_at: u64) -> Vec<UpdateEvent> {
    items
        .into_iter()
        .filter_map(|item| match UpdateEvent::from_snapshot_entry(item, channel, received_at) {
            Ok(event) if &event.channel == channel => Some(event),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping snapshot entry for {}: {}", channel, e);
                None
            }
        })
        .collect()
}
