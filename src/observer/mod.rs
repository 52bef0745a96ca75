//! Observer registration and notification fan-out.

mod registry;

pub use registry::{ObserverRegistry, SubscriptionHandle};

use crate::model::event::UpdateEvent;

/// What an observer is told about its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A snapshot replaced the ring. Carries the full ring contents, oldest first.
    Seeded(Vec<UpdateEvent>),
    /// One accepted live update.
    Event(UpdateEvent),
    /// The engine shut down. Nothing follows.
    Closed,
}

impl Notification {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
