//! # Voice Streaming
//!
//! Real-time audio over a dedicated binary channel.
//!
//! ## Modules:
//! - **schema**: load-once `.proto` description of the frame types
//! - **frame**: protobuf wire encode/decode driven by that schema
//! - **pcm**: sample conversion, level meter and inbound audio decoding
//! - **scheduler**: gapless playback cursor with drift reset
//! - **device**: audio output / microphone abstraction and backends
//! - **channel**: binary WebSocket transport
//! - **client**: the `Stopped -> Starting -> Streaming` state machine

pub mod channel;
pub mod client;
pub mod device;
pub mod frame;
pub mod pcm;
pub mod scheduler;
pub mod schema;

pub use channel::{VoiceChannel, VoiceTransport, WebSocketVoiceTransport};
pub use client::{VoiceClient, VoiceEvent, VoiceHandle, VoiceState, VoiceStatus};
pub use scheduler::{AudioStreamState, PlaybackScheduler};
