pub mod channel;
pub mod event;

pub use channel::{ChannelId, ChannelKind};
pub use event::{
    parse_frame, BookUpdate, EventKind, EventPayload, LevelChange, OrderLevel, ParsedFrame,
    PriceChange, Side, TickSizeChange, TradeActivity, Tweet, UpdateEvent,
};
