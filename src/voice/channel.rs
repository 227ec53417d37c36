//! Binary voice channel.
//!
//! One WebSocket carries encoded frames in both directions, one binary
//! message per frame. Keep-alive pings are answered here; text messages are
//! not part of the protocol and are skipped.

use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// Factory for voice channels.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn VoiceChannel>, TransportError>;
}

/// An open binary channel.
#[async_trait]
pub trait VoiceChannel: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Next binary frame. An error means the channel is gone.
    async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError>;

    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Voice channel over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WebSocketVoiceTransport;

#[async_trait]
impl VoiceTransport for WebSocketVoiceTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn VoiceChannel>, TransportError> {
        let (ws, response) = tokio_tungstenite::connect_async(url).await?;
        info!(url = %url, status = %response.status(), "Voice channel open");
        Ok(Box::new(WebSocketVoiceChannel { ws }))
    }
}

pub struct WebSocketVoiceChannel {
    ws: WsStream,
}

#[async_trait]
impl VoiceChannel for WebSocketVoiceChannel {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.ws
            .send(Message::Binary(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Ping(payload))) => {
                    self.ws.send(Message::Pong(payload)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(TransportError::Closed(reason));
                }
                Some(Ok(Message::Text(text))) => {
                    debug!(len = text.len(), "Ignoring text message on voice channel");
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed("stream ended".into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "Error while closing voice channel");
        }
    }
}
