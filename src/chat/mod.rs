//! # Text Chat
//!
//! One logical conversation with the backend over a Socket.IO channel.
//!
//! ## Components:
//! - **message / college_info**: transcript entries and the college-info merge rule
//! - **protocol**: typed `send_message` / `response` / `voice_response` payloads
//! - **session**: the sans-IO connection and transcript state machine
//! - **socketio**: Engine.IO framing and the WebSocket transport
//! - **client**: the tokio task that drives a session

pub mod client;
pub mod college_info;
pub mod message;
pub mod protocol;
pub mod session;
pub mod socketio;

pub use client::{ChatClient, ChatHandle};
pub use college_info::{merge_college_info, CollegeInfo, CollegeInfoPartial};
pub use message::{ChatMessage, Sender, ToolCall, ToolCallKind};
pub use session::{ChatEvent, ChatSession, ConnectionState, SendOutcome, SessionSnapshot};
pub use socketio::{ChatChannel, ChatTransport, SocketIoTransport};
