//! # Error Handling
//!
//! Error taxonomy shared by the chat session and the voice client.
//!
//! ## Categories:
//! - **TransportError**: channel open, handshake or send failed. The text
//!   channel recovers by scheduled reconnect; the voice channel surfaces it for
//!   a manual restart.
//! - **ProtocolDecodeError**: a packet or audio frame could not be decoded. The
//!   offending unit is logged and dropped; the stream continues.
//! - **NotConnected**: a send was attempted outside the `Connected` state.
//! - **DeviceError::PermissionDenied**: microphone access refused.
//!
//! Nothing here is fatal to the host process: every failure is local to one
//! session or client instance and recoverable by starting it again.

use thiserror::Error;

/// Failures of a text or voice channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The channel could not be opened (DNS, TCP, TLS, HTTP upgrade).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The channel opened but the protocol handshake was rejected or malformed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Writing to an open channel failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The peer closed the channel.
    #[error("channel closed: {0}")]
    Closed(String),
}

/// A single packet or frame that could not be understood.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolDecodeError {
    #[error("malformed packet: {0}")]
    Packet(String),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("undecodable audio: {0}")]
    Audio(String),
}

/// Problems loading or interpreting the frame schema.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error("failed to fetch schema from {source_name}: {message}")]
    Fetch { source_name: String, message: String },

    #[error("schema parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("schema has no message type `{0}`")]
    MissingType(String),

    #[error("message `{message}` has no field `{field}`")]
    MissingField { message: String, field: String },

    #[error("field `{message}.{field}` has type `{found}`, expected {expected}")]
    FieldType {
        message: String,
        field: String,
        found: String,
        expected: String,
    },
}

/// Audio device acquisition and streaming failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    #[error("audio stream error: {0}")]
    Stream(String),
}

/// Top-level error returned by the public client APIs.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    ProtocolDecode(#[from] ProtocolDecodeError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Send attempted while the text channel is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The session or client task has already been torn down.
    #[error("session closed")]
    SessionClosed,

    /// The voice client is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(String),
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::Closed(err.to_string())
            }
            WsError::Io(_) | WsError::Url(_) | WsError::Http(_) => {
                TransportError::Connect(err.to_string())
            }
            other => TransportError::Send(other.to_string()),
        }
    }
}

/// Shorthand for results carrying a [`ClientError`].
pub type AppResult<T> = Result<T, ClientError>;
