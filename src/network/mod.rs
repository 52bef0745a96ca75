//! Transport session: the single push connection shared by every channel.
//!
//! The session dials the feed, sends subscription frames for tracked markets,
//! keeps the link alive with `PING` heartbeats and reconnects with capped
//! exponential backoff. It never interprets message contents; raw frames go
//! to the engine as [`SessionEvent::Message`].

pub mod backoff;
pub mod connection;
pub mod state;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use connection::{SessionCommand, SessionEvent, TransportSession};
pub use state::{SessionState, SharedSessionState};
pub use transport::{Connector, Inbound, Link, WsConnector};
