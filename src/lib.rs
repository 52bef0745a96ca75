//! Live update synchronization for prediction-market feeds.
//!
//! A [`SyncClient`] owns one push connection and any number of channels. Each
//! channel is seeded from a snapshot, then kept current by merging live diffs
//! into a bounded ring, and re-seeded after every reconnect.

pub mod client;
pub mod config;
pub mod engine;
mod error;
pub mod model;
pub mod network;
pub mod observer;
pub mod ring;
pub mod snapshot;

pub use client::SyncClient;
pub use config::{SyncConfig, SyncConfigBuilder};
pub use engine::FailureSignal;
pub use error::SyncError;
pub use model::{ChannelId, ChannelKind, EventKind, EventPayload, UpdateEvent};
pub use network::SessionState;
pub use observer::{Notification, SubscriptionHandle};
pub use ring::ChannelInfo;
pub use snapshot::{HttpSnapshotLoader, Snapshot, SnapshotLoader};
