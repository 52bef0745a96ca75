use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::channel::ChannelId;

use super::backoff::BackoffPolicy;
use super::state::{SessionState, SharedSessionState};
use super::transport::{Connector, Inbound, Link};

/// Heartbeat payload sent to the feed.
pub const PING: &str = "PING";
/// Heartbeat reply from the feed. Swallowed by the session.
pub const PONG: &str = "PONG";

/// What the session reports to the engine.
#[derive(Debug)]
pub enum SessionEvent {
    /// Link is up. `reseed` is set when this follows a reconnect, meaning
    /// messages may have been missed.
    Connected { reseed: bool },
    /// One raw text frame.
    Message(String),
    /// Link dropped; the session is already retrying.
    Lost(SyncError),
    /// Attempt budget spent. The session parks until [`SessionCommand::Retry`].
    PersistentFailure { attempts: u32 },
}

/// What the engine asks of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start receiving a channel. Market channels get a subscription frame.
    Track(ChannelId),
    Untrack(ChannelId),
    /// Leave the parked state and dial again.
    Retry,
}

enum PumpExit {
    Closed,
    Lost(SyncError),
}

/// Subscription frame for a set of markets.
pub fn subscribe_frame<'a>(markets: impl IntoIterator<Item = &'a ChannelId>) -> String {
    let ids: Vec<&str> = markets.into_iter().map(ChannelId::as_str).collect();
    serde_json::json!({
        "type": "MARKET",
        "condition_ids": ids,
    })
    .to_string()
}

/// Owns the single push connection and its reconnect state machine.
pub struct TransportSession {
    url: Url,
    connector: Arc<dyn Connector>,
    backoff: BackoffPolicy,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    rate_limit_cooldown: Duration,
    state: SharedSessionState,
    event_sender: mpsc::Sender<SessionEvent>,
    command_receiver: mpsc::UnboundedReceiver<SessionCommand>,
    markets: BTreeSet<ChannelId>,
    cancel: CancellationToken,
}

impl TransportSession {
    pub fn new(
        config: &SyncConfig,
        connector: Arc<dyn Connector>,
        event_sender: mpsc::Sender<SessionEvent>,
        command_receiver: mpsc::UnboundedReceiver<SessionCommand>,
        cancel: CancellationToken,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            url: Url::parse(&config.endpoint)?,
            connector,
            backoff: config.backoff(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            rate_limit_cooldown: config.rate_limit_cooldown(),
            state: SharedSessionState::new(),
            event_sender,
            command_receiver,
            markets: BTreeSet::new(),
            cancel,
        })
    }

    /// Read handle on the session state.
    pub fn state(&self) -> SharedSessionState {
        self.state.clone()
    }

    // Runs until the owning context is cancelled or the engine goes away.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;
        let mut retry: u32 = 0;
        let mut interrupted = false;
        let mut pending_delay: Option<Duration> = None;

        loop {
            if let Some(delay) = pending_delay.take() {
                debug!("Next attempt in {:?}", delay);
                if !self.wait(Some(delay)).await {
                    break;
                }
            }

            self.transition(if interrupted {
                SessionState::Reconnecting
            } else {
                SessionState::Connecting
            });
            info!("Connecting to {}...", self.url);

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                attempt = self.connector.connect(&self.url) => attempt,
            };

            match attempt {
                Ok(link) => {
                    info!("Connected to {}", self.url);
                    failures = 0;
                    self.transition(SessionState::Connected);
                    if !self.emit(SessionEvent::Connected { reseed: interrupted }).await {
                        break;
                    }

                    match self.pump(link).await {
                        PumpExit::Closed => break,
                        PumpExit::Lost(e) => {
                            warn!("Link lost: {}", e);
                            interrupted = true;
                            self.transition(SessionState::Reconnecting);
                            if !self.emit(SessionEvent::Lost(e)).await {
                                break;
                            }
                            retry = 1;
                            pending_delay = Some(self.backoff.delay(retry));
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    interrupted = true;
                    self.transition(SessionState::Reconnecting);

                    if self.backoff.is_exhausted(failures) {
                        error!("Connection failed: {}. Giving up after {} attempts", e, failures);
                        let signal = SessionEvent::PersistentFailure { attempts: failures };
                        if !self.emit(signal).await {
                            break;
                        }
                        // parked until the caller asks for a retry
                        if !self.wait(None).await {
                            break;
                        }
                        info!("Manual retry requested");
                        failures = 0;
                        retry = 0;
                        continue;
                    }

                    retry += 1;
                    let delay = match e {
                        SyncError::RateLimited => self.rate_limit_cooldown,
                        _ => self.backoff.delay(retry),
                    };
                    error!(
                        "Connection failed: {}. Retrying ({}/{})...",
                        e,
                        failures,
                        self.backoff.max_attempts()
                    );
                    pending_delay = Some(delay);
                }
            }
        }

        self.transition(SessionState::Disconnected);
        info!("Transport session closed");
    }

    fn transition(&self, next: SessionState) {
        let prev = self.state.set(next);
        if prev != next {
            debug!("Session {} -> {}", prev, next);
        }
    }

    async fn emit(&self, event: SessionEvent) -> bool {
        self.event_sender.send(event).await.is_ok()
    }

    /// Sleep for `delay` (or until a retry request when `None`) while keeping
    /// the tracked set current. Returns false if the session should stop.
    async fn wait(&mut self, delay: Option<Duration>) -> bool {
        let timer = sleep(delay.unwrap_or(Duration::MAX));
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut timer, if delay.is_some() => return true,
                cmd = self.command_receiver.recv() => match cmd {
                    Some(SessionCommand::Retry) => return true,
                    Some(cmd) => {
                        self.note(cmd);
                    }
                    None => return false,
                },
            }
        }
    }

    /// Record a tracking change. Returns the market to subscribe to now, if any.
    fn note(&mut self, cmd: SessionCommand) -> Option<ChannelId> {
        match cmd {
            SessionCommand::Track(channel) => {
                if channel.is_market() && self.markets.insert(channel.clone()) {
                    return Some(channel);
                }
                None
            }
            SessionCommand::Untrack(channel) => {
                self.markets.remove(&channel);
                None
            }
            SessionCommand::Retry => None,
        }
    }

    async fn pump(&mut self, mut link: Box<dyn Link>) -> PumpExit {
        if !self.markets.is_empty() {
            if let Err(e) = link.send(subscribe_frame(&self.markets)).await {
                return PumpExit::Lost(e);
            }
        }

        let period = self.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    link.close().await;
                    return PumpExit::Closed;
                }
                inbound = link.recv() => match inbound {
                    Some(Ok(Inbound::Text(text))) => {
                        last_seen = Instant::now();
                        if text.trim() == PONG {
                            trace!("Heartbeat acknowledged");
                        } else if !self.emit(SessionEvent::Message(text)).await {
                            return PumpExit::Closed;
                        }
                    }
                    Some(Ok(Inbound::Control)) => last_seen = Instant::now(),
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        return PumpExit::Lost(e);
                    }
                    None => {
                        warn!("Stream ended unexpectedly");
                        return PumpExit::Lost(SyncError::TransportLost("stream ended".into()));
                    }
                },
                cmd = self.command_receiver.recv() => match cmd {
                    Some(cmd) => {
                        if let Some(market) = self.note(cmd) {
                            if let Err(e) = link.send(subscribe_frame([&market])).await {
                                error!("Failed to subscribe {}: {}", market, e);
                                return PumpExit::Lost(e);
                            }
                        }
                    }
                    None => {
                        info!("Client command channel closed, shutting down...");
                        link.close().await;
                        return PumpExit::Closed;
                    }
                },
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= self.heartbeat_timeout {
                        return PumpExit::Lost(SyncError::TransportLost(format!(
                            "no traffic for {:?}",
                            last_seen.elapsed()
                        )));
                    }
                    if let Err(e) = link.send(PING.to_string()).await {
                        return PumpExit::Lost(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame() {
        let markets = [ChannelId::market("0xa"), ChannelId::market("0xb")];
        let frame: serde_json::Value = serde_json::from_str(&subscribe_frame(&markets)).unwrap();
        assert_eq!(frame["type"], "MARKET");
        assert_eq!(frame["condition_ids"], serde_json::json!(["0xa", "0xb"]));
    }
}
