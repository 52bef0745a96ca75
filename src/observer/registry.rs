use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use tracing::trace;

use crate::model::channel::ChannelId;

use super::Notification;

type Callback = Box<dyn Fn(&Notification) + Send + Sync>;

/// Identifies one registration. Dropping it does not unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    channel: ChannelId,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Registered, waiting for the engine to hand over the baseline.
    Pending,
    /// Receives every notification for its channel.
    Attached,
    Detached,
}

struct Observer {
    id: u64,
    callback: Callback,
    // Held for the duration of every invocation. Reentrant so an observer may
    // unsubscribe itself from inside its own callback.
    gate: ReentrantMutex<Cell<Phase>>,
}

impl Observer {
    fn deliver(&self, notification: &Notification) -> bool {
        let phase = self.gate.lock();
        if phase.get() != Phase::Attached {
            return false;
        }
        (self.callback)(notification);
        true
    }

    fn attach(&self, seed: Option<&Notification>) -> bool {
        let phase = self.gate.lock();
        if phase.get() != Phase::Pending {
            return false;
        }
        phase.set(Phase::Attached);
        if let Some(seed) = seed {
            (self.callback)(seed);
        }
        true
    }

    fn close(&self) {
        let phase = self.gate.lock();
        if phase.get() != Phase::Detached {
            (self.callback)(&Notification::Closed);
            phase.set(Phase::Detached);
        }
    }

    /// Blocks until any in-flight invocation on another thread returns.
    fn detach(&self) {
        self.gate.lock().set(Phase::Detached);
    }
}

/// Channel → observers table.
///
/// A new observer is pending until the engine attaches it, so its first
/// notification is always a baseline and nothing is delivered twice. Delivery
/// snapshots the observer list and runs callbacks without holding the table
/// lock, so callbacks may subscribe or unsubscribe freely.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<HashMap<ChannelId, Vec<Arc<Observer>>>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` on `channel`. It receives nothing until
    /// [`attach`](Self::attach) is called for the returned handle.
    pub fn subscribe<F>(&self, channel: ChannelId, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let observer = Arc::new(Observer {
            id,
            callback: Box::new(callback),
            gate: ReentrantMutex::new(Cell::new(Phase::Pending)),
        });

        self.observers
            .write()
            .entry(channel.clone())
            .or_default()
            .push(observer);
        trace!("Observer {} subscribed to {}", id, channel);

        SubscriptionHandle { id, channel }
    }

    /// Start delivering to a pending observer, handing it `seed` first.
    /// Returns false if it already left or was attached before.
    pub fn attach(&self, handle: &SubscriptionHandle, seed: Option<&Notification>) -> bool {
        match self.find(handle) {
            Some(observer) => observer.attach(seed),
            None => false,
        }
    }

    pub fn is_registered(&self, handle: &SubscriptionHandle) -> bool {
        self.find(handle).is_some()
    }

    fn find(&self, handle: &SubscriptionHandle) -> Option<Arc<Observer>> {
        self.observers
            .read()
            .get(&handle.channel)?
            .iter()
            .find(|o| o.id == handle.id)
            .cloned()
    }

    /// Remove a registration. Idempotent. Returns true when this removed the
    /// channel's last observer.
    ///
    /// Once this returns the callback is never invoked again.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let (removed, last) = {
            let mut observers = self.observers.write();
            let Some(list) = observers.get_mut(&handle.channel) else {
                return false;
            };
            let Some(pos) = list.iter().position(|o| o.id == handle.id) else {
                return false;
            };
            let removed = list.remove(pos);
            let last = list.is_empty();
            if last {
                observers.remove(&handle.channel);
            }
            (removed, last)
        };

        removed.detach();
        trace!("Observer {} unsubscribed from {}", handle.id, handle.channel);
        last
    }

    pub fn has_observers(&self, channel: &ChannelId) -> bool {
        self.observers.read().contains_key(channel)
    }

    pub fn observer_count(&self, channel: &ChannelId) -> usize {
        self.observers.read().get(channel).map_or(0, Vec::len)
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.observers.read().keys().cloned().collect()
    }

    /// Deliver to every attached observer on `channel`, in registration order.
    pub fn notify(&self, channel: &ChannelId, notification: &Notification) -> usize {
        let targets = match self.observers.read().get(channel) {
            Some(list) => list.clone(),
            None => return 0,
        };
        targets.iter().filter(|observer| observer.deliver(notification)).count()
    }

    /// Tell everyone [`Notification::Closed`] and drop all registrations.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.observers.write().drain().collect();
        for (_, list) in drained {
            for observer in list {
                observer.close();
            }
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let observers = self.observers.read();
        f.debug_struct("ObserverRegistry")
            .field("channels", &observers.len())
            .field("observers", &observers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::{EventPayload, UpdateEvent};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Notification) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        (count, move |_: &Notification| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn attached<F>(
        registry: &ObserverRegistry,
        channel: ChannelId,
        callback: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let handle = registry.subscribe(channel, callback);
        assert!(registry.attach(&handle, None));
        handle
    }

    #[test]
    fn test_last_flag() {
        let registry = ObserverRegistry::new();
        let m1 = ChannelId::market("m1");

        let a = registry.subscribe(m1.clone(), |_| {});
        let b = registry.subscribe(m1.clone(), |_| {});
        assert_eq!(registry.observer_count(&m1), 2);

        assert!(!registry.unsubscribe(&a));
        assert!(registry.unsubscribe(&b));
        assert!(!registry.has_observers(&m1));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = ObserverRegistry::new();
        let handle = registry.subscribe(ChannelId::tweets(), |_| {});
        assert!(registry.unsubscribe(&handle));
        assert!(!registry.unsubscribe(&handle));
        assert!(!registry.is_registered(&handle));
    }

    #[test]
    fn test_pending_observer_gets_seed_before_events() {
        let registry = ObserverRegistry::new();
        let m1 = ChannelId::market("m1");
        let seen: Arc<parking_lot::Mutex<Vec<Notification>>> = Arc::default();
        let sink = seen.clone();
        let handle = registry.subscribe(m1.clone(), move |n| sink.lock().push(n.clone()));

        // not attached yet
        let early = UpdateEvent {
            channel: m1.clone(),
            timestamp: 1,
            payload: EventPayload::Unknown {
                tag: None,
                raw: serde_json::Value::Null,
            },
        };
        registry.notify(&m1, &Notification::Event(early));
        assert!(seen.lock().is_empty());

        assert!(registry.attach(&handle, Some(&Notification::Seeded(Vec::new()))));
        assert!(!registry.attach(&handle, Some(&Notification::Seeded(Vec::new()))));
        registry.notify(&m1, &Notification::Closed);

        assert_eq!(
            *seen.lock(),
            vec![Notification::Seeded(Vec::new()), Notification::Closed]
        );
    }

    #[test]
    fn test_attach_after_unsubscribe_is_refused() {
        let registry = ObserverRegistry::new();
        let (count, cb) = counter();
        let handle = registry.subscribe(ChannelId::trades(), cb);
        registry.unsubscribe(&handle);

        assert!(!registry.attach(&handle, Some(&Notification::Closed)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_notify_only_reaches_channel() {
        let registry = ObserverRegistry::new();
        let (m1_count, m1_cb) = counter();
        let (m2_count, m2_cb) = counter();
        attached(&registry, ChannelId::market("m1"), m1_cb);
        attached(&registry, ChannelId::market("m2"), m2_cb);

        assert_eq!(registry.notify(&ChannelId::market("m1"), &Notification::Closed), 1);
        assert_eq!(registry.notify(&ChannelId::market("m3"), &Notification::Closed), 0);
        assert_eq!(m1_count.load(Ordering::SeqCst), 1);
        assert_eq!(m2_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_delivery_after_unsubscribe() {
        let registry = ObserverRegistry::new();
        let (count, cb) = counter();
        let handle = attached(&registry, ChannelId::trades(), cb);

        registry.notify(&ChannelId::trades(), &Notification::Closed);
        registry.unsubscribe(&handle);
        registry.notify(&ChannelId::trades(), &Notification::Closed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_from_own_callback() {
        let registry = Arc::new(ObserverRegistry::new());
        let handle_slot: Arc<parking_lot::Mutex<Option<SubscriptionHandle>>> = Default::default();
        let count = Arc::new(AtomicUsize::new(0));

        let reg = registry.clone();
        let slot = handle_slot.clone();
        let seen = count.clone();
        let handle = attached(&registry, ChannelId::market("m1"), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            if let Some(h) = slot.lock().as_ref() {
                reg.unsubscribe(h);
            }
        });
        *handle_slot.lock() = Some(handle);

        registry.notify(&ChannelId::market("m1"), &Notification::Closed);
        registry.notify(&ChannelId::market("m1"), &Notification::Closed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_waits_for_in_flight_callback() {
        let registry = Arc::new(ObserverRegistry::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();

        let done = finished.clone();
        let handle = attached(&registry, ChannelId::market("m1"), move |_| {
            let _ = entered_tx.send(());
            std::thread::sleep(Duration::from_millis(50));
            done.fetch_add(1, Ordering::SeqCst);
        });

        let reg = registry.clone();
        let worker = std::thread::spawn(move || {
            reg.notify(&ChannelId::market("m1"), &Notification::Closed);
        });

        entered_rx.recv().unwrap();
        registry.unsubscribe(&handle);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        worker.join().unwrap();
    }

    #[test]
    fn test_close_all_reaches_pending_and_attached() {
        let registry = ObserverRegistry::new();
        let closed = Arc::new(AtomicUsize::new(0));
        for (channel, attach) in [(ChannelId::market("m1"), true), (ChannelId::tweets(), false)] {
            let closed = closed.clone();
            let handle = registry.subscribe(channel, move |n| {
                if n.is_closed() {
                    closed.fetch_add(1, Ordering::SeqCst);
                }
            });
            if attach {
                registry.attach(&handle, None);
            }
        }

        registry.close_all();
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(registry.channels().is_empty());
    }
}
