use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::engine::{ChannelTable, EngineCommand, FailureSignal, SyncEngine};
use crate::error::SyncError;
use crate::model::channel::ChannelId;
use crate::model::event::UpdateEvent;
use crate::network::{Connector, SessionState, SharedSessionState, TransportSession, WsConnector};
use crate::observer::{Notification, ObserverRegistry, SubscriptionHandle};
use crate::ring::ChannelInfo;
use crate::snapshot::{HttpSnapshotLoader, SnapshotLoader};

/// Handle on one running sync engine and its push connection.
///
/// Any number of channels and observers share the single connection. Dropping
/// the client shuts everything down.
pub struct SyncClient {
    // Channel to send commands to the engine
    command_sender: mpsc::UnboundedSender<EngineCommand>,

    // Wrapped in Option so the caller can take it once
    failure_receiver: Option<mpsc::Receiver<FailureSignal>>,

    observers: Arc<ObserverRegistry>,
    channels: ChannelTable,
    session: SharedSessionState,
    cancel: CancellationToken,
}

impl SyncClient {
    /// Connect to `config.endpoint` over WebSocket, loading snapshots from
    /// `config.snapshot_base_url`.
    pub async fn connect(config: SyncConfig) -> Result<Self, SyncError> {
        let loader = HttpSnapshotLoader::new(&config.snapshot_base_url)?;
        Self::connect_with(config, Arc::new(WsConnector), Arc::new(loader)).await
    }

    /// Connect with a custom transport and snapshot source.
    pub async fn connect_with(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
        loader: Arc<dyn SnapshotLoader>,
    ) -> Result<Self, SyncError> {
        let buffer = config.event_buffer.max(1);
        let (tx_session_event, rx_session_event) = mpsc::channel(buffer);
        let (tx_session_cmd, rx_session_cmd) = mpsc::unbounded_channel();
        let (tx_engine_cmd, rx_engine_cmd) = mpsc::unbounded_channel();
        let (tx_failure, rx_failure) = mpsc::channel(buffer);

        let cancel = CancellationToken::new();
        let observers = Arc::new(ObserverRegistry::new());
        let channels = ChannelTable::default();

        let session = TransportSession::new(
            &config,
            connector,
            tx_session_event,
            rx_session_cmd,
            cancel.clone(),
        )?;
        let state = session.state();
        let engine = SyncEngine::new(
            &config,
            loader,
            observers.clone(),
            channels.clone(),
            state.clone(),
            tx_session_cmd,
            tx_failure,
        );

        tokio::spawn(session.run());
        tokio::spawn(engine.run(rx_session_event, rx_engine_cmd, cancel.clone()));

        Ok(Self {
            command_sender: tx_engine_cmd,
            failure_receiver: Some(rx_failure),
            observers,
            channels,
            session: state,
            cancel,
        })
    }

    /// Observe `channel`. The callback first receives a
    /// [`Notification::Seeded`] with the channel's baseline, either right
    /// away if it is already loaded or once its snapshot lands. After that it
    /// gets one [`Notification::Event`] per accepted update.
    ///
    /// Callbacks run on the engine task; keep them short.
    pub fn subscribe<F>(
        &self,
        channel: impl Into<ChannelId>,
        callback: F,
    ) -> Result<SubscriptionHandle, SyncError>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(SyncError::ChannelClosed);
        }

        let handle = self.observers.subscribe(channel.into(), callback);
        if self.send_command(EngineCommand::Attach(handle.clone())).is_err() {
            self.observers.unsubscribe(&handle);
            return Err(SyncError::ChannelClosed);
        }
        Ok(handle)
    }

    /// Stop observing. Idempotent. No callback for this handle runs after it
    /// returns; the channel is released if this was its last observer.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if self.observers.unsubscribe(handle) {
            // engine already gone on close; nothing left to release
            let _ = self.send_command(EngineCommand::Release(handle.channel().clone()));
        }
    }

    /// Current ring contents, oldest first.
    pub fn ring(&self, channel: &ChannelId) -> Option<Vec<UpdateEvent>> {
        self.channels.read().get(channel).map(|state| state.ring().to_vec())
    }

    pub fn channel_info(&self, channel: &ChannelId) -> Option<ChannelInfo> {
        self.channels.read().get(channel).map(|state| state.info())
    }

    pub fn session_state(&self) -> SessionState {
        self.session.get()
    }

    /// Persistent failure signals. Can be taken once.
    pub fn failures(&mut self) -> Option<mpsc::Receiver<FailureSignal>> {
        self.failure_receiver.take()
    }

    /// Resume after a persistent failure: redial and refetch unseeded channels.
    pub fn retry(&self) -> Result<(), SyncError> {
        self.send_command(EngineCommand::Retry)
    }

    /// Tear down the session and every channel. Observers get
    /// [`Notification::Closed`].
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that closes this client when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn send_command(&self, cmd: EngineCommand) -> Result<(), SyncError> {
        self.command_sender.send(cmd).map_err(|_| SyncError::ChannelClosed)
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
