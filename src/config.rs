//! # Configuration Management
//!
//! Loads client configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (`config.toml`, optional)
//! - Environment variables (with `APP_` prefix, `__` between sections)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `API_URL` / `VOICE_URL` (deployment shorthands)
//! 2. Environment variables (`APP_CHAT__API_URL`, `APP_VOICE__BLOCK_SIZE`, ...)
//! 3. Configuration file (`config.toml`)
//! 4. Default values (defined in the Default impl)

use crate::error::{AppResult, ClientError};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub chat: ChatConfig,
    pub voice: VoiceConfig,
}

/// Text chat channel settings.
///
/// ## Fields:
/// - `api_url`: base URL of the conversational backend (Socket.IO + REST)
/// - `reconnect_delay_ms`: fixed delay before each reconnect attempt
/// - `greeting` / `greeting_options`: first bot message of every session
/// - `conversation_id_max`: conversation ids are drawn from `1..=max`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConfig {
    pub api_url: String,
    pub reconnect_delay_ms: u64,
    pub greeting: String,
    pub greeting_options: Vec<String>,
    pub conversation_id_max: u32,
}

/// Voice streaming settings.
///
/// `schema_source` is either `builtin`, a filesystem path, or an http(s) URL
/// pointing at a `.proto` description of the frame types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceConfig {
    pub url: String,
    pub sample_rate: u32,
    pub num_channels: u32,
    pub block_size: usize,
    pub play_time_reset_threshold_secs: f64,
    pub schema_source: String,
    pub schema_frame_type: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chat: ChatConfig::default(),
            voice: VoiceConfig::default(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000".to_string(),
            reconnect_delay_ms: 5000,
            greeting: "Hello welcome to EduMitra, Say hello 👋 to get started ".to_string(),
            greeting_options: vec![
                "hello".to_string(),
                "engineering".to_string(),
                "polytechnic".to_string(),
            ],
            conversation_id_max: 1000,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765".to_string(),
            sample_rate: 16000, // 16kHz mono, what the voice gateway expects
            num_channels: 1,
            block_size: 512,
            play_time_reset_threshold_secs: 1.0,
            schema_source: "builtin".to_string(),
            schema_frame_type: "pipecat.Frame".to_string(),
        }
    }
}

impl ChatConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_CHAT__RECONNECT_DELAY_MS=2000`
    /// - `APP_VOICE__SCHEMA_SOURCE=/srv/frames.proto`
    /// - `API_URL=https://api.example.org`: special case used by deployments
    /// - `VOICE_URL=wss://voice.example.org`
    pub fn load() -> AppResult<Self> {
        Self::load_from("config")
    }

    /// Same as [`AppConfig::load`] with an explicit config file stem.
    pub fn load_from(file_stem: &str) -> AppResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("chat.greeting_options")
                    .try_parsing(true),
            );

        if let Ok(api_url) = env::var("API_URL") {
            settings = settings.set_override("chat.api_url", api_url)?;
        }

        if let Ok(voice_url) = env::var("VOICE_URL") {
            settings = settings.set_override("voice.url", voice_url)?;
        }

        let config: AppConfig = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values that would leave a session unable to run.
    pub fn validate(&self) -> AppResult<()> {
        if self.chat.api_url.trim().is_empty() {
            return Err(ClientError::Config("chat.api_url cannot be empty".into()));
        }

        if self.chat.reconnect_delay_ms == 0 {
            return Err(ClientError::Config("chat.reconnect_delay_ms must be greater than 0".into()));
        }

        if self.chat.conversation_id_max == 0 {
            return Err(ClientError::Config("chat.conversation_id_max must be greater than 0".into()));
        }

        if self.voice.url.trim().is_empty() {
            return Err(ClientError::Config("voice.url cannot be empty".into()));
        }

        if self.voice.sample_rate == 0 || self.voice.num_channels == 0 {
            return Err(ClientError::Config(
                "voice.sample_rate and voice.num_channels must be greater than 0".into(),
            ));
        }

        if self.voice.block_size == 0 {
            return Err(ClientError::Config("voice.block_size must be greater than 0".into()));
        }

        if !(self.voice.play_time_reset_threshold_secs > 0.0) {
            return Err(ClientError::Config(
                "voice.play_time_reset_threshold_secs must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }
}
