//! Bounded per-channel event storage.
//!
//! Each channel keeps its recent history in an [`EventRing`]. Market channels
//! hold the last 100 diffs and dashboard feeds the last 20 by default; the
//! limits come from [`SyncConfig`](crate::config::SyncConfig).

pub mod buffer;
pub mod state;

pub use buffer::{EventRing, RingStats};
pub use state::{ChannelInfo, ChannelState};
