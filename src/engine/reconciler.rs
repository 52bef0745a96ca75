use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::channel::ChannelId;
use crate::model::event::{now_ms, parse_frame, UpdateEvent};
use crate::network::backoff::{BackoffPolicy, Exhausted};
use crate::network::{SessionCommand, SessionEvent, SharedSessionState};
use crate::observer::{Notification, ObserverRegistry, SubscriptionHandle};
use crate::ring::ChannelState;
use crate::snapshot::{Snapshot, SnapshotLoader};

use super::{ChannelTable, EngineCommand, FailureSignal};

/// Result of one fetch task, tagged with the generation it was started for.
#[derive(Debug)]
struct SnapshotOutcome {
    channel: ChannelId,
    generation: u64,
    result: Result<Snapshot, Exhausted<SyncError>>,
}

/// The engine task. Sole writer of every [`ChannelState`].
pub struct SyncEngine {
    config: SyncConfig,
    loader: Arc<dyn SnapshotLoader>,
    backoff: BackoffPolicy,
    channels: ChannelTable,
    fetches: HashMap<ChannelId, JoinHandle<()>>,
    observers: Arc<ObserverRegistry>,
    session: SharedSessionState,
    session_commands: mpsc::UnboundedSender<SessionCommand>,
    failures: mpsc::Sender<FailureSignal>,
    outcome_sender: mpsc::UnboundedSender<SnapshotOutcome>,
    outcome_receiver: mpsc::UnboundedReceiver<SnapshotOutcome>,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        loader: Arc<dyn SnapshotLoader>,
        observers: Arc<ObserverRegistry>,
        channels: ChannelTable,
        session: SharedSessionState,
        session_commands: mpsc::UnboundedSender<SessionCommand>,
        failures: mpsc::Sender<FailureSignal>,
    ) -> Self {
        let (outcome_sender, outcome_receiver) = mpsc::unbounded_channel();
        Self {
            config: config.clone(),
            loader,
            backoff: config.backoff(),
            channels,
            fetches: HashMap::new(),
            observers,
            session,
            session_commands,
            failures,
            outcome_sender,
            outcome_receiver,
        }
    }

    pub async fn run(
        mut self,
        mut session_events: mpsc::Receiver<SessionEvent>,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        cancel: CancellationToken,
    ) {
        info!("Sync engine started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, shutting down...");
                    break;
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        info!("Client dropped, shutting down...");
                        break;
                    }
                },
                Some(event) = session_events.recv() => self.handle_session_event(event),
                Some(outcome) = self.outcome_receiver.recv() => self.handle_snapshot(outcome),
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Attach(handle) => self.attach(handle),
            EngineCommand::Release(channel) => self.release(channel),
            EngineCommand::Retry => self.retry(),
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { reseed } => {
                if reseed {
                    info!("Reconnected, re-seeding {} channel(s)", self.channels.read().len());
                    self.reseed_all();
                } else {
                    info!("Live feed connected");
                }
            }
            SessionEvent::Message(raw) => {
                self.apply_incoming(&raw);
            }
            SessionEvent::Lost(e) => {
                warn!("Live feed interrupted ({}), holding until reconnect", e);
            }
            SessionEvent::PersistentFailure { attempts } => {
                error!("Live feed unavailable after {} attempts", attempts);
                self.signal(FailureSignal::Transport { attempts });
            }
        }
    }

    fn attach(&mut self, handle: SubscriptionHandle) {
        // unsubscribed before this command was processed
        if !self.observers.is_registered(&handle) {
            trace!("Observer {} left before attaching", handle.id());
            return;
        }

        let channel = handle.channel().clone();
        self.track(channel.clone());

        let seed = self
            .channels
            .read()
            .get(&channel)
            .filter(|state| state.is_loaded())
            .map(|state| Notification::Seeded(state.ring().to_vec()));
        let seeded = seed.is_some();
        if self.observers.attach(&handle, seed.as_ref()) {
            trace!("Observer {} attached to {} (seeded: {})", handle.id(), channel, seeded);
        }
    }

    fn track(&mut self, channel: ChannelId) {
        if self.channels.read().contains_key(&channel) {
            trace!("{} already tracked", channel);
            return;
        }

        let capacity = self.config.capacity_for(&channel);
        self.channels
            .write()
            .insert(channel.clone(), ChannelState::new(channel.clone(), capacity));
        debug!("Tracking {} (capacity {})", channel, capacity);

        self.start_fetch(&channel);
        let _ = self.session_commands.send(SessionCommand::Track(channel));
    }

    fn release(&mut self, channel: ChannelId) {
        // resubscribed before this command was processed
        if self.observers.has_observers(&channel) {
            trace!("{} regained observers, keeping it", channel);
            return;
        }

        if let Some(fetch) = self.fetches.remove(&channel) {
            fetch.abort();
        }
        if self.channels.write().remove(&channel).is_some() {
            debug!("Released {}", channel);
            let _ = self.session_commands.send(SessionCommand::Untrack(channel));
        }
    }

    fn retry(&mut self) {
        info!("Manual retry requested");
        let _ = self.session_commands.send(SessionCommand::Retry);

        let stalled: Vec<ChannelId> = self
            .channels
            .read()
            .values()
            .filter(|state| !state.is_loaded() && !self.fetches.contains_key(state.channel()))
            .map(|state| state.channel().clone())
            .collect();
        for channel in stalled {
            self.start_fetch(&channel);
        }
    }

    fn reseed_all(&mut self) {
        let tracked: Vec<ChannelId> = self.channels.read().keys().cloned().collect();
        for channel in tracked {
            self.start_fetch(&channel);
        }
    }

    /// Mark `channel` unseeded and (re)start its snapshot fetch, aborting any
    /// fetch already in flight.
    fn start_fetch(&mut self, channel: &ChannelId) {
        let generation = match self.channels.write().get_mut(channel) {
            Some(state) => state.begin_snapshot(),
            None => return,
        };
        if let Some(previous) = self.fetches.remove(channel) {
            previous.abort();
        }

        let task = fetch_snapshot(
            self.loader.clone(),
            self.backoff,
            channel.clone(),
            generation,
            self.outcome_sender.clone(),
        );
        self.fetches.insert(channel.clone(), tokio::spawn(task));
        debug!("Snapshot requested for {} (generation {})", channel, generation);
    }

    fn handle_snapshot(&mut self, outcome: SnapshotOutcome) {
        let SnapshotOutcome {
            channel,
            generation,
            result,
        } = outcome;

        let seeded = {
            let mut channels = self.channels.write();
            let Some(state) = channels.get_mut(&channel) else {
                debug!("Discarding snapshot for released channel {}", channel);
                return;
            };
            if state.generation() != generation {
                debug!("Discarding stale snapshot for {} (generation {})", channel, generation);
                return;
            }
            self.fetches.remove(&channel);

            result.map(|snapshot| {
                let received = snapshot.events.len();
                state.seed(generation, snapshot.events, snapshot.details);
                info!("Seeded {} with {} of {} event(s)", channel, state.ring().len(), received);
                state.ring().to_vec()
            })
        };

        match seeded {
            Ok(events) => {
                self.observers.notify(&channel, &Notification::Seeded(events));
            }
            Err(Exhausted { attempts, last_error }) => {
                error!(
                    "Snapshot for {} failed after {} attempts: {}",
                    channel, attempts, last_error
                );
                self.signal(FailureSignal::Snapshot { channel, attempts });
            }
        }
    }

    /// Parse a raw frame and merge every event it carries. Returns how many
    /// events were accepted.
    pub(crate) fn apply_incoming(&mut self, raw: &str) -> usize {
        if !self.session.is_connected() {
            trace!("Ignoring frame while session is {}", self.session.get());
            return 0;
        }

        let frame = match parse_frame(raw, now_ms()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Discarding malformed message: {}", e);
                return 0;
            }
        };
        for e in &frame.rejected {
            warn!("Discarding malformed event: {}", e);
        }

        frame
            .events
            .into_iter()
            .filter(|event| self.apply_event(event))
            .count()
    }

    fn apply_event(&self, event: &UpdateEvent) -> bool {
        {
            let mut channels = self.channels.write();
            match channels.get_mut(&event.channel) {
                None => return false,
                Some(state) if !state.is_loaded() => {
                    debug!(
                        "Snapshot pending for {}, dropping {}",
                        event.channel,
                        event.kind().as_str()
                    );
                    return false;
                }
                Some(state) => {
                    state.apply(event.clone());
                }
            }
        }

        trace!("Applied {} to {}", event.kind().as_str(), event.channel);
        self.observers
            .notify(&event.channel, &Notification::Event(event.clone()));
        true
    }

    fn signal(&self, signal: FailureSignal) {
        if let Err(e) = self.failures.try_send(signal) {
            debug!("Failure signal not delivered: {}", e);
        }
    }

    fn shutdown(&mut self) {
        for (_, fetch) in self.fetches.drain() {
            fetch.abort();
        }
        self.channels.write().clear();
        self.observers.close_all();
        info!("Sync engine stopped");
    }
}

async fn fetch_snapshot(
    loader: Arc<dyn SnapshotLoader>,
    backoff: BackoffPolicy,
    channel: ChannelId,
    generation: u64,
    outcomes: mpsc::UnboundedSender<SnapshotOutcome>,
) {
    let what = format!("Snapshot for {}", channel);
    let result = backoff.retry(&what, |_| loader.load_snapshot(&channel)).await;
    let _ = outcomes.send(SnapshotOutcome {
        channel,
        generation,
        result,
    });
}
