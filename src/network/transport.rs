//! Physical transport abstraction and its WebSocket implementation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::SyncError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One inbound frame as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Ping/pong/binary traffic. Only proves the link is alive.
    Control,
}

/// Dials the push source.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Link>, SyncError>;
}

/// An open connection.
#[async_trait]
pub trait Link: Send {
    /// Next inbound frame; `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Result<Inbound, SyncError>>;

    async fn send(&mut self, text: String) -> Result<(), SyncError>;

    /// Best-effort close handshake.
    async fn close(&mut self);
}

/// Connects with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Link>, SyncError> {
        match connect_async(url.as_str()).await {
            Ok((stream, response)) => {
                debug!("Handshake complete ({})", response.status());
                Ok(Box::new(WsLink { stream }))
            }
            Err(tungstenite::Error::Http(response)) if response.status().as_u16() == 429 => {
                Err(SyncError::RateLimited)
            }
            Err(e) => Err(e.into()),
        }
    }
}

pub struct WsLink {
    stream: WsStream,
}

#[async_trait]
impl Link for WsLink {
    async fn recv(&mut self) -> Option<Result<Inbound, SyncError>> {
        match self.stream.next().await? {
            Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.to_string()))),
            // tungstenite queues the pong reply for pings on its own
            Ok(Message::Close(frame)) => {
                debug!("Close frame received: {:?}", frame);
                None
            }
            Ok(_) => Some(Ok(Inbound::Control)),
            Err(e) => Some(Err(e.into())),
        }
    }

    async fn send(&mut self, text: String) -> Result<(), SyncError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Close handshake failed: {}", e);
        }
    }
}
