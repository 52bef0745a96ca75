//! Typed update events and the frame parser.
//!
//! Frames arrive in three shapes:
//! - a bare event object: `{"event_type":"book","market":"0x..",...}`
//! - a JSON array batch of such objects
//! - the backend relay wrapper: `{"market_id":"0x..","data":{...}}`
//!
//! Dashboard events (`tweet_received`, `trade_executed`, `trade_skipped`) use
//! `type` as the tag and carry their payload under `data`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

use super::channel::ChannelId;

/// Event kind as tagged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Book,
    PriceChange,
    TickSizeChange,
    TweetReceived,
    TradeExecuted,
    TradeSkipped,
    Unknown,
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "book" => Self::Book,
            "price_change" => Self::PriceChange,
            "tick_size_change" => Self::TickSizeChange,
            "tweet_received" => Self::TweetReceived,
            "trade_executed" => Self::TradeExecuted,
            "trade_skipped" => Self::TradeSkipped,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::PriceChange => "price_change",
            Self::TickSizeChange => "tick_size_change",
            Self::TweetReceived => "tweet_received",
            Self::TradeExecuted => "trade_executed",
            Self::TradeSkipped => "trade_skipped",
            Self::Unknown => "unknown",
        }
    }

    /// The global feed this kind is routed to, if it is a dashboard kind.
    pub fn feed(&self) -> Option<ChannelId> {
        match self {
            Self::TweetReceived => Some(ChannelId::tweets()),
            Self::TradeExecuted | Self::TradeSkipped => Some(ChannelId::trades()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY", alias = "buy")]
    Buy,
    #[serde(rename = "SELL", alias = "sell")]
    Sell,
}

/// One resting level in a book update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLevel {
    #[serde(deserialize_with = "decimal")]
    pub price: f64,
    #[serde(deserialize_with = "decimal")]
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    #[serde(default, alias = "bids")]
    pub buys: Vec<OrderLevel>,
    #[serde(default, alias = "asks")]
    pub sells: Vec<OrderLevel>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: Side,
    #[serde(deserialize_with = "decimal")]
    pub price: f64,
    #[serde(deserialize_with = "decimal")]
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    #[serde(default, alias = "price_changes")]
    pub changes: Vec<LevelChange>,
    #[serde(default)]
    pub asset_id: Option<String>,
}

impl PriceChange {
    /// Highest BUY price among the changes.
    pub fn best_bid(&self) -> Option<f64> {
        self.changes
            .iter()
            .filter(|c| c.side == Side::Buy)
            .map(|c| c.price)
            .reduce(f64::max)
    }

    /// Lowest SELL price among the changes.
    pub fn best_ask(&self) -> Option<f64> {
        self.changes
            .iter()
            .filter(|c| c.side == Side::Sell)
            .map(|c| c.price)
            .reduce(f64::min)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSizeChange {
    #[serde(deserialize_with = "decimal")]
    pub old_tick_size: f64,
    #[serde(deserialize_with = "decimal")]
    pub new_tick_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub tweet_id: String,
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeActivity {
    #[serde(default)]
    pub token_id: Option<String>,
    #[serde(default)]
    pub token_name: Option<String>,
    pub market_name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Kind-specific body of an [`UpdateEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Book(BookUpdate),
    PriceChange(PriceChange),
    TickSizeChange(TickSizeChange),
    TweetReceived(Tweet),
    TradeExecuted(TradeActivity),
    TradeSkipped(TradeActivity),
    /// Unrecognized kind, kept verbatim.
    Unknown { tag: Option<String>, raw: Value },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Book(_) => EventKind::Book,
            Self::PriceChange(_) => EventKind::PriceChange,
            Self::TickSizeChange(_) => EventKind::TickSizeChange,
            Self::TweetReceived(_) => EventKind::TweetReceived,
            Self::TradeExecuted(_) => EventKind::TradeExecuted,
            Self::TradeSkipped(_) => EventKind::TradeSkipped,
            Self::Unknown { .. } => EventKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateEvent {
    pub channel: ChannelId,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub payload: EventPayload,
}

impl UpdateEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Parse a single JSON object into an event.
    ///
    /// `received_at` stands in for a missing `timestamp` field.
    ///
    /// The channel comes from the relay wrapper's `market_id`, then the feed a
    /// dashboard kind belongs to, then `market`, `condition_id` or `asset_id`.
    /// An unrecognized kind is kept as [`EventPayload::Unknown`] only if one
    /// of those names a channel. With none of them there is nowhere to route
    /// it, so it is rejected with [`SyncError::Parse`].
    pub fn from_value(value: Value, received_at: u64) -> Result<Self, SyncError> {
        Self::decode(value, None, received_at)
    }

    /// Like [`from_value`](Self::from_value), but an entry with no channel id
    /// of its own is attributed to `channel`. Snapshot bodies are already
    /// scoped to one channel and often omit it.
    pub fn from_snapshot_entry(
        value: Value,
        channel: &ChannelId,
        received_at: u64,
    ) -> Result<Self, SyncError> {
        Self::decode(value, Some(channel), received_at)
    }

    fn decode(
        value: Value,
        fallback: Option<&ChannelId>,
        received_at: u64,
    ) -> Result<Self, SyncError> {
        let Value::Object(mut outer) = value else {
            return Err(SyncError::parse("event is not a JSON object"));
        };

        // Relay wrapper: {"market_id": .., "data": {..}}
        let relayed = match (outer.get("market_id"), outer.get("data")) {
            (Some(Value::String(id)), Some(Value::Object(_))) => Some(ChannelId::market(id)),
            _ => None,
        };
        let body = match relayed {
            Some(_) => match outer.remove("data") {
                Some(Value::Object(inner)) => inner,
                _ => return Err(SyncError::parse("relay wrapper without data")),
            },
            None => outer,
        };

        let tag = body
            .get("event_type")
            .or_else(|| body.get("type"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let kind = tag.as_deref().map_or(EventKind::Unknown, EventKind::from_tag);

        let channel = relayed
            .or_else(|| kind.feed())
            .or_else(|| market_of(&body))
            .or_else(|| fallback.cloned())
            .ok_or_else(|| SyncError::parse("event carries no channel id"))?;

        let timestamp = parse_timestamp(body.get("timestamp"), received_at)?;
        let payload = decode_payload(kind, tag, body)?;

        Ok(Self {
            channel,
            timestamp,
            payload,
        })
    }
}

fn market_of(body: &Map<String, Value>) -> Option<ChannelId> {
    ["market", "condition_id", "asset_id"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(ChannelId::market)
}

fn decode_payload(
    kind: EventKind,
    tag: Option<String>,
    mut body: Map<String, Value>,
) -> Result<EventPayload, SyncError> {
    let bad = |e: serde_json::Error| SyncError::parse(format!("{}: {}", kind.as_str(), e));

    let payload = match kind {
        EventKind::Book => EventPayload::Book(from_map(body).map_err(bad)?),
        EventKind::PriceChange => EventPayload::PriceChange(from_map(body).map_err(bad)?),
        EventKind::TickSizeChange => EventPayload::TickSizeChange(from_map(body).map_err(bad)?),
        EventKind::TweetReceived => {
            EventPayload::TweetReceived(from_data(&mut body).map_err(bad)?)
        }
        EventKind::TradeExecuted => {
            EventPayload::TradeExecuted(from_data(&mut body).map_err(bad)?)
        }
        EventKind::TradeSkipped => {
            EventPayload::TradeSkipped(from_data(&mut body).map_err(bad)?)
        }
        EventKind::Unknown => EventPayload::Unknown {
            tag,
            raw: Value::Object(body),
        },
    };
    Ok(payload)
}

fn from_map<T: DeserializeOwned>(body: Map<String, Value>) -> serde_json::Result<T> {
    serde_json::from_value(Value::Object(body))
}

/// Dashboard events nest their payload under `data`.
fn from_data<T: DeserializeOwned>(body: &mut Map<String, Value>) -> serde_json::Result<T> {
    serde_json::from_value(body.remove("data").unwrap_or(Value::Null))
}

fn parse_timestamp(value: Option<&Value>, received_at: u64) -> Result<u64, SyncError> {
    match value {
        None | Some(Value::Null) => Ok(received_at),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| SyncError::parse(format!("bad timestamp {}", n))),
        Some(Value::String(s)) => parse_timestamp_str(s)
            .ok_or_else(|| SyncError::parse(format!("bad timestamp {:?}", s))),
        Some(other) => Err(SyncError::parse(format!("bad timestamp {}", other))),
    }
}

fn parse_timestamp_str(s: &str) -> Option<u64> {
    if let Ok(ms) = s.parse::<u64>() {
        return Some(ms);
    }
    // The dashboard backend emits naive ISO-8601 (no offset); read those as UTC.
    let millis = chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|dt| dt.and_utc().timestamp_millis())
        })
        .ok()?;
    u64::try_from(millis).ok()
}

/// Accepts `0.52` as well as `"0.52"`.
fn decimal<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Outcome of parsing one raw transport frame.
#[derive(Debug, Default)]
pub struct ParsedFrame {
    pub events: Vec<UpdateEvent>,
    /// Elements of a batch that failed to parse. The rest of the batch stands.
    pub rejected: Vec<SyncError>,
}

/// Parse a raw text frame. Fails only when the frame is not JSON at all.
pub fn parse_frame(raw: &str, received_at: u64) -> Result<ParsedFrame, SyncError> {
    let value: Value = serde_json::from_str(raw)?;
    let mut frame = ParsedFrame::default();

    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    for item in items {
        match UpdateEvent::from_value(item, received_at) {
            Ok(event) => frame.events.push(event),
            Err(e) => frame.rejected.push(e),
        }
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_book() {
        let raw = r#"{"event_type":"book","market":"m1","asset_id":"a1","timestamp":"1700000000123",
            "buys":[{"price":"0.48","size":"100"}],"sells":[{"price":0.52,"size":40}]}"#;
        let frame = parse_frame(raw, 0).unwrap();
        assert_eq!(frame.events.len(), 1);

        let event = &frame.events[0];
        assert_eq!(event.channel, ChannelId::market("m1"));
        assert_eq!(event.timestamp, 1_700_000_000_123);
        match &event.payload {
            EventPayload::Book(book) => {
                assert_eq!(book.buys[0].price, 0.48);
                assert_eq!(book.sells[0].size, 40.0);
                assert_eq!(book.asset_id.as_deref(), Some("a1"));
            }
            other => panic!("Expected Book, got {:?}", other),
        }
    }

    #[test]
    fn test_book_accepts_bids_asks() {
        let raw = r#"{"event_type":"book","market":"m1",
            "bids":[{"price":"0.1","size":"1"}],"asks":[]}"#;
        let event = &parse_frame(raw, 0).unwrap().events[0];
        let EventPayload::Book(book) = &event.payload else {
            panic!("Expected Book");
        };
        assert_eq!(book.buys.len(), 1);
        assert!(book.sells.is_empty());
    }

    #[test]
    fn test_relay_wrapper_sets_channel() {
        let raw = r#"{"market_id":"0xcond","data":{"event_type":"tick_size_change","asset_id":"tok",
            "old_tick_size":"0.01","new_tick_size":"0.001","timestamp":5}}"#;
        let event = &parse_frame(raw, 0).unwrap().events[0];
        assert_eq!(event.channel, ChannelId::market("0xcond"));
        assert_eq!(
            event.payload,
            EventPayload::TickSizeChange(TickSizeChange {
                old_tick_size: 0.01,
                new_tick_size: 0.001,
            })
        );
    }

    #[test]
    fn test_price_change_best_levels() {
        let raw = r#"{"event_type":"price_change","market":"m1","changes":[
            {"side":"BUY","price":"0.40","size":"10"},
            {"side":"BUY","price":"0.45","size":"5"},
            {"side":"SELL","price":"0.55","size":"7"},
            {"side":"SELL","price":"0.60","size":"1"}]}"#;
        let event = &parse_frame(raw, 0).unwrap().events[0];
        let EventPayload::PriceChange(change) = &event.payload else {
            panic!("Expected PriceChange");
        };
        assert_eq!(change.best_bid(), Some(0.45));
        assert_eq!(change.best_ask(), Some(0.55));
    }

    #[test]
    fn test_dashboard_events_route_to_feeds() {
        let raw = r#"[
            {"type":"tweet_received","timestamp":"2024-05-01T12:00:00.250000",
             "data":{"tweet_id":"1","username":"poly","text":"hello"}},
            {"type":"trade_skipped","timestamp":"2024-05-01T12:00:01Z",
             "data":{"market_name":"Will it rain?","reason":"low confidence"}}
        ]"#;
        let frame = parse_frame(raw, 0).unwrap();
        assert_eq!(frame.events.len(), 2);
        assert_eq!(frame.events[0].channel, ChannelId::tweets());
        assert_eq!(frame.events[0].timestamp, 1_714_564_800_250);
        assert_eq!(frame.events[1].channel, ChannelId::trades());
        assert_eq!(frame.events[1].kind(), EventKind::TradeSkipped);
    }

    #[test]
    fn test_unknown_kind_is_kept_verbatim() {
        let raw = r#"{"event_type":"last_trade_price","market":"m1","price":"0.5","timestamp":9}"#;
        let event = &parse_frame(raw, 0).unwrap().events[0];
        match &event.payload {
            EventPayload::Unknown { tag, raw } => {
                assert_eq!(tag.as_deref(), Some("last_trade_price"));
                assert_eq!(raw["price"], "0.5");
                assert_eq!(raw["market"], "m1");
            }
            other => panic!("Expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_unroutable_unknown_kind_is_rejected() {
        let raw = r#"{"type":"trade_pending","data":{"market_name":"Rain?"}}"#;
        let frame = parse_frame(raw, 0).unwrap();
        assert!(frame.events.is_empty());
        assert!(matches!(
            &frame.rejected[..],
            [SyncError::Parse(reason)] if reason.contains("no channel")
        ));

        // the same kind is kept once it names a market
        let raw = r#"{"type":"trade_pending","market":"m1"}"#;
        let event = &parse_frame(raw, 0).unwrap().events[0];
        assert_eq!(event.kind(), EventKind::Unknown);
        assert_eq!(event.channel, ChannelId::market("m1"));

        // snapshot entries fall back to the requested channel
        let entry = serde_json::json!({"type": "trade_pending"});
        let event = UpdateEvent::from_snapshot_entry(entry, &ChannelId::trades(), 0).unwrap();
        assert_eq!(event.channel, ChannelId::trades());
    }

    #[test]
    fn test_missing_timestamp_uses_receive_time() {
        let raw = r#"{"event_type":"book","market":"m1"}"#;
        let event = &parse_frame(raw, 42).unwrap().events[0];
        assert_eq!(event.timestamp, 42);
    }

    #[test]
    fn test_malformed_batch_element_is_isolated() {
        let raw = r#"[
            {"event_type":"price_change","market":"m1",
                "changes":[{"side":"BUY","price":"abc","size":"1"}]},
            {"event_type":"book","market":"m1"},
            {"event_type":"book"}
        ]"#;
        let frame = parse_frame(raw, 0).unwrap();
        assert_eq!(frame.events.len(), 1);
        assert_eq!(frame.rejected.len(), 2);
    }

    #[test]
    fn test_not_json_is_an_error() {
        assert!(parse_frame("PONG", 0).is_err());
        assert!(parse_frame("{", 0).is_err());
    }
}
