//! # EduMitra Realtime
//!
//! Client-side real-time communication for the EduMitra assistant.
//!
//! ## Subsystems:
//! - **chat**: text conversation over Socket.IO with fixed-delay reconnect,
//!   ordered transcript and college-info merging
//! - **voice**: binary audio streaming with a schema-driven frame codec and
//!   gapless playback scheduling
//! - **api**: the auxiliary REST endpoints (summary, quiz, course comparison)
//!
//! The two subsystems share nothing at runtime; a host creates whichever it
//! needs from an [`config::AppConfig`].

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod voice;

pub use config::AppConfig;
pub use error::{AppResult, ClientError};
