//! Transport session state machine values.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SessionState {
    /// No connection and none wanted. Entered only on close.
    #[default]
    Disconnected = 0,
    /// First dial in progress.
    Connecting = 1,
    /// Link up; live messages are trusted.
    Connected = 2,
    /// Link lost or dial failed; retrying with backoff, or parked after
    /// exhausting attempts.
    Reconnecting = 3,
}

impl SessionState {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lock-free shared view of the session state.
///
/// Anyone can read it; only the transport session writes it.
#[derive(Debug, Clone, Default)]
pub struct SharedSessionState(Arc<AtomicU8>);

impl SharedSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.get() == SessionState::Connected
    }

    /// Returns the previous state.
    pub(crate) fn set(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.0.swap(state.as_u8(), Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_conversion() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Reconnecting,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
        assert_eq!(SessionState::from_u8(200), SessionState::Disconnected);
    }

    #[test]
    fn test_shared_state_is_shared() {
        let state = SharedSessionState::new();
        let reader = state.clone();
        assert_eq!(reader.get(), SessionState::Disconnected);

        assert_eq!(state.set(SessionState::Connected), SessionState::Disconnected);
        assert!(reader.is_connected());
        assert_eq!(format!("{}", reader.get()), "connected");
    }
}
