//! Reconciliation engine.
//!
//! Merges snapshot baselines with the live feed. The engine is a single task:
//! session events, caller commands and snapshot results all arrive over
//! channels and are handled one at a time, so a ring is never mutated
//! concurrently. Readers see the channel table through a shared `RwLock`.

mod reconciler;

pub use reconciler::SyncEngine;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::SyncError;
use crate::model::channel::ChannelId;
use crate::observer::SubscriptionHandle;
use crate::ring::ChannelState;

/// Tracked channels. Written by the engine task only.
pub type ChannelTable = Arc<RwLock<HashMap<ChannelId, ChannelState>>>;

/// Requests from the client facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// An observer subscribed. The first one on a channel creates its state
    /// and starts the snapshot; later ones are handed the current ring.
    Attach(SubscriptionHandle),
    /// Last observer left: drop state and abort any pending fetch.
    Release(ChannelId),
    /// Leave persistent failure: redial and refetch unseeded channels.
    Retry,
}

/// A retry budget ran out. Surfaced to the caller through
/// [`SyncClient::failures`](crate::SyncClient::failures).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
    /// The push connection could not be re-established. The session is
    /// parked until [`SyncClient::retry`](crate::SyncClient::retry).
    Transport { attempts: u32 },
    /// The snapshot for `channel` could not be loaded. The channel stays
    /// tracked but unseeded.
    Snapshot { channel: ChannelId, attempts: u32 },
}

impl FailureSignal {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Transport { attempts } | Self::Snapshot { attempts, .. } => *attempts,
        }
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        match self {
            Self::Transport { .. } => None,
            Self::Snapshot { channel, .. } => Some(channel),
        }
    }

    pub fn to_error(&self) -> SyncError {
        SyncError::PersistentFailure {
            attempts: self.attempts(),
        }
    }
}

impl std::fmt::Display for FailureSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { attempts } => write!(f, "transport down after {} attempts", attempts),
            Self::Snapshot { channel, attempts } => {
                write!(f, "snapshot for {} unavailable after {} attempts", channel, attempts)
            }
        }
    }
}
