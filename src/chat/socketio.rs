//! # Socket.IO Text Transport
//!
//! Minimal Engine.IO v4 / Socket.IO v5 client over a single WebSocket, enough
//! to talk to the conversational backend on the default namespace.
//!
//! ## Handshake:
//! 1. Server sends the Engine.IO open packet `0{"sid":..,"pingInterval":..}`
//! 2. Client sends the namespace connect `40`
//! 3. Server acknowledges with `40{"sid":..}` (or rejects with `44{...}`)
//!
//! After the ack, events travel as `42["name",payload]`. Server pings (`2`)
//! are answered with pongs (`3`) inside [`ChatChannel::next_event`], so the
//! session never sees keep-alive traffic.

use crate::error::{ProtocolDecodeError, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Value),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    Ack { id: u64, args: Vec<Value> },
    ConnectError(Value),
}

/// Decode one text frame.
pub fn decode_packet(text: &str) -> Result<EnginePacket, ProtocolDecodeError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ProtocolDecodeError::Packet("empty packet".into()))?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let handshake = serde_json::from_str(rest)
                .map_err(|e| ProtocolDecodeError::Packet(format!("bad open packet: {e}")))?;
            Ok(EnginePacket::Open(handshake))
        }
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => decode_socket_packet(rest).map(EnginePacket::Message),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(ProtocolDecodeError::Packet(format!("unknown engine packet type `{other}`"))),
    }
}

fn decode_socket_packet(text: &str) -> Result<SocketPacket, ProtocolDecodeError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ProtocolDecodeError::Packet("empty socket packet".into()))?;
    let mut rest = chars.as_str();

    // Optional namespace: "/chat," ... only the default one is used here.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let ack_id = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let body = &rest[digits..];

    let json = |body: &str| -> Result<Option<Value>, ProtocolDecodeError> {
        if body.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(body)
            .map(Some)
            .map_err(|e| ProtocolDecodeError::Packet(format!("bad packet body: {e}")))
    };

    match kind {
        '0' => Ok(SocketPacket::Connect(json(body)?)),
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let args = match json(body)? {
                Some(Value::Array(args)) => args,
                _ => return Err(ProtocolDecodeError::Packet("event packet without argument array".into())),
            };
            let mut args = args.into_iter();
            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => return Err(ProtocolDecodeError::Packet("event packet without a name".into())),
            };
            Ok(SocketPacket::Event { name, args: args.collect() })
        }
        '3' => {
            let id = ack_id.ok_or_else(|| ProtocolDecodeError::Packet("ack without id".into()))?;
            let args = match json(body)? {
                Some(Value::Array(args)) => args,
                _ => Vec::new(),
            };
            Ok(SocketPacket::Ack { id, args })
        }
        '4' => Ok(SocketPacket::ConnectError(json(body)?.unwrap_or(Value::Null))),
        other => Err(ProtocolDecodeError::Packet(format!("unsupported socket packet type `{other}`"))),
    }
}

/// `42["name",payload]`
pub fn encode_event(name: &str, payload: &Value) -> String {
    let frame = Value::Array(vec![Value::String(name.to_string()), payload.clone()]);
    format!("42{frame}")
}

/// Derive the WebSocket endpoint from the backend base URL.
pub fn socket_io_url(api_url: &str) -> Result<String, TransportError> {
    let base = api_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err(TransportError::Connect("empty api url".into()));
    }
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    };
    Ok(format!("{ws_base}/socket.io/?EIO=4&transport=websocket"))
}

/// A named event received on an open channel.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEvent {
    pub name: String,
    pub payload: Value,
}

/// Factory for text channels. Returns only once the server acknowledged the
/// connection; any failure before that is a connect error.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self, api_url: &str) -> Result<Box<dyn ChatChannel>, TransportError>;
}

/// An open, acknowledged text channel.
#[async_trait]
pub trait ChatChannel: Send {
    async fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Next application event. An error means the channel is gone.
    async fn next_event(&mut self) -> Result<IncomingEvent, TransportError>;

    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket.IO over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct SocketIoTransport;

#[async_trait]
impl ChatTransport for SocketIoTransport {
    async fn connect(&self, api_url: &str) -> Result<Box<dyn ChatChannel>, TransportError> {
        let url = socket_io_url(api_url)?;
        debug!(url = %url, "Opening Socket.IO channel");
        let (mut ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;

        let mut opened = false;
        loop {
            let text = match ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::Handshake("closed during handshake".into()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            match decode_packet(&text) {
                Ok(EnginePacket::Open(handshake)) => {
                    debug!(sid = %handshake["sid"], "Engine.IO open");
                    opened = true;
                    ws.send(Message::Text("40".to_string())).await?;
                }
                Ok(EnginePacket::Ping) => ws.send(Message::Text("3".to_string())).await?,
                Ok(EnginePacket::Message(SocketPacket::Connect(_))) if opened => {
                    info!(url = %url, "Socket.IO namespace connected");
                    return Ok(Box::new(SocketIoChannel { ws }));
                }
                Ok(EnginePacket::Message(SocketPacket::ConnectError(reason))) => {
                    return Err(TransportError::Handshake(format!("connect rejected: {reason}")))
                }
                Ok(EnginePacket::Close) => {
                    return Err(TransportError::Handshake("server closed during handshake".into()))
                }
                Ok(other) => debug!(packet = ?other, "Ignoring packet during handshake"),
                Err(e) => return Err(TransportError::Handshake(e.to_string())),
            }
        }
    }
}

pub struct SocketIoChannel {
    ws: WsStream,
}

#[async_trait]
impl ChatChannel for SocketIoChannel {
    async fn emit(&mut self, event: &str, payload: Value) -> Result<(), TransportError> {
        let frame = encode_event(event, &payload);
        self.ws
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_event(&mut self) -> Result<IncomingEvent, TransportError> {
        loop {
            let text = match self.ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                    return Err(TransportError::Closed(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed("stream ended".into())),
            };

            match decode_packet(&text) {
                Ok(EnginePacket::Ping) => {
                    self.ws.send(Message::Text("3".to_string())).await?;
                }
                Ok(EnginePacket::Message(SocketPacket::Event { name, args })) => {
                    let payload = args.into_iter().next().unwrap_or(Value::Null);
                    return Ok(IncomingEvent { name, payload });
                }
                Ok(EnginePacket::Message(SocketPacket::Disconnect)) | Ok(EnginePacket::Close) => {
                    return Err(TransportError::Closed("server disconnected".into()));
                }
                Ok(other) => debug!(packet = ?other, "Ignoring packet"),
                Err(e) => warn!(error = %e, "Dropping undecodable packet"),
            }
        }
    }

    async fn close(&mut self) {
        // Namespace disconnect, then the WebSocket close handshake.
        let _ = self.ws.send(Message::Text("41".to_string())).await;
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "Error while closing Socket.IO channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_and_keepalive() {
        let packet = decode_packet(r#"0{"sid":"abc","pingInterval":25000,"pingTimeout":20000}"#).unwrap();
        assert!(matches!(packet, EnginePacket::Open(ref v) if v["sid"] == "abc"));
        assert_eq!(decode_packet("2").unwrap(), EnginePacket::Ping);
        assert_eq!(decode_packet("3").unwrap(), EnginePacket::Pong);
        assert_eq!(decode_packet("1").unwrap(), EnginePacket::Close);
    }

    #[test]
    fn test_decode_connect_ack_and_error() {
        assert!(matches!(
            decode_packet(r#"40{"sid":"xyz"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::Connect(Some(_)))
        ));
        assert_eq!(decode_packet("40").unwrap(), EnginePacket::Message(SocketPacket::Connect(None)));
        assert!(matches!(
            decode_packet(r#"44{"message":"Not authorized"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::ConnectError(ref v)) if v["message"] == "Not authorized"
        ));
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack_id() {
        let packet = decode_packet(r#"42/chat,17["response",{"res":{"msg":"Hi!"}}]"#).unwrap();
        let EnginePacket::Message(SocketPacket::Event { name, args }) = packet else {
            panic!("expected event");
        };
        assert_eq!(name, "response");
        assert_eq!(args[0]["res"]["msg"], "Hi!");
    }

    #[test]
    fn test_decode_rejects_malformed_packets() {
        assert!(decode_packet("").is_err());
        assert!(decode_packet("9").is_err());
        assert!(decode_packet("42{not json").is_err());
        assert!(decode_packet(r#"42[1,2]"#).is_err());
    }

    #[test]
    fn test_encode_event() {
        let frame = encode_event("send_message", &json!({"msg": "hello", "id": 3}));
        assert!(frame.starts_with("42[\"send_message\","));
        let decoded = decode_packet(&frame).unwrap();
        assert!(matches!(
            decoded,
            EnginePacket::Message(SocketPacket::Event { ref name, ref args }) if name == "send_message" && args[0]["id"] == 3
        ));
    }

    #[test]
    fn test_socket_io_url() {
        assert_eq!(
            socket_io_url("http://localhost:5000/").unwrap(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_io_url("https://api.example.org").unwrap(),
            "wss://api.example.org/socket.io/?EIO=4&transport=websocket"
        );
        assert!(socket_io_url("  ").is_err());
    }
}
