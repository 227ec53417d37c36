//! # Chat Session State Machine
//!
//! [`ChatSession`] owns everything one logical conversation needs: the
//! connection state, the ordered transcript, the accumulated college info and
//! the conversation id. It performs no I/O. Every input returns a list of
//! [`Effect`]s for the driver in [`crate::chat::client`] to execute, which
//! keeps every transition testable without a socket or a clock.
//!
//! ## Connection Lifecycle:
//! 1. **Idle**: constructed, or unmounted
//! 2. **Connecting**: channel open requested, waiting for the ack
//! 3. **Connected**: ack received; sends are allowed
//! 4. **Disconnected**: a transport error occurred; a reconnect is scheduled
//!    after the fixed delay, which re-enters **Connecting**

use crate::chat::college_info::{merge_college_info, CollegeInfo, CollegeInfoPartial};
use crate::chat::message::{ChatMessage, Sender};
use crate::chat::protocol::{
    OutboundEvent, SendMessagePayload, ServerEvent, RESPONSE_EVENT, VOICE_RESPONSE_EVENT,
};
use crate::config::ChatConfig;
use crate::error::{ProtocolDecodeError, TransportError};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NOT_CONNECTED_REPLY: &str =
    "Sorry, I'm having trouble connecting. Please try again in a moment.";
pub const NOT_CONNECTED_TOAST: &str = "Not connected to server. Please wait...";
pub const CONNECTED_TOAST: &str = "Connected to server";
pub const UNREADABLE_REPLY_TOAST: &str = "Received an unreadable reply from the server";

/// Current status of the text channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Success,
    Error,
}

/// A short user-visible notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub text: String,
}

impl Toast {
    pub fn success(text: impl Into<String>) -> Self {
        Self { level: ToastLevel::Success, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: ToastLevel::Error, text: text.into() }
    }
}

/// Observable changes published to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    StatusChanged(ConnectionState),
    MessageAppended(ChatMessage),
    CollegeInfoUpdated(CollegeInfo),
    Typing(bool),
    Toast(Toast),
    Cleared,
}

/// Work the driver must perform on behalf of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a new channel. `attempt` counts opens since mount, starting at 1.
    OpenChannel { attempt: u32 },
    /// Close the current channel, if any, and drop any pending open.
    CloseChannel,
    Emit(OutboundEvent),
    /// Arm the reconnect timer; it fires [`ChatSession::reconnect_due`].
    ScheduleReconnect(Duration),
    CancelReconnect,
    Publish(ChatEvent),
}

/// Inputs coming from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The server acknowledged the channel open.
    Connected,
    /// The open attempt failed.
    ConnectError(TransportError),
    /// An established channel went away.
    Disconnected(TransportError),
    Message(ServerEvent),
    /// A server event whose payload could not be decoded.
    Undecodable { event: String, error: ProtocolDecodeError },
}

/// Result of [`ChatSession::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing happened.
    Ignored,
    Sent,
    /// Not connected; a local failure reply was appended instead.
    NotConnected,
}

/// One `{user, bot}` row of the summary request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryTurn {
    pub user: String,
    pub bot: String,
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub conversation_id: Option<u32>,
    pub status: ConnectionState,
    pub bot_typing: bool,
    pub messages: Vec<ChatMessage>,
    pub college_info: CollegeInfo,
}

/// `session-{unix millis}-{9 base36 chars}`
pub fn generate_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("session-{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}

pub struct ChatSession {
    config: ChatConfig,
    session_id: String,
    conversation_id: Option<u32>,
    state: ConnectionState,
    messages: Vec<ChatMessage>,
    college_info: CollegeInfo,
    bot_typing: bool,
    has_connected: bool,
    attempts: u32,
}

impl ChatSession {
    pub fn new(config: ChatConfig) -> Self {
        let messages = vec![Self::greeting(&config)];
        Self {
            config,
            session_id: generate_session_id(),
            conversation_id: None,
            state: ConnectionState::Idle,
            messages,
            college_info: CollegeInfo::default(),
            bot_typing: false,
            has_connected: false,
            attempts: 0,
        }
    }

    fn greeting(config: &ChatConfig) -> ChatMessage {
        ChatMessage::bot(config.greeting.clone()).with_options(config.greeting_options.clone())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn conversation_id(&self) -> Option<u32> {
        self.conversation_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn college_info(&self) -> &CollegeInfo {
        &self.college_info
    }

    pub fn bot_typing(&self) -> bool {
        self.bot_typing
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            conversation_id: self.conversation_id,
            status: self.state,
            bot_typing: self.bot_typing,
            messages: self.messages.clone(),
            college_info: self.college_info.clone(),
        }
    }

    fn set_state(&mut self, state: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != state {
            debug!(session_id = %self.session_id, from = self.state.as_str(), to = state.as_str(), "Connection state change");
            self.state = state;
            effects.push(Effect::Publish(ChatEvent::StatusChanged(state)));
        }
    }

    fn append(&mut self, message: ChatMessage, effects: &mut Vec<Effect>) {
        self.messages.push(message.clone());
        effects.push(Effect::Publish(ChatEvent::MessageAppended(message)));
    }

    fn set_typing(&mut self, typing: bool, effects: &mut Vec<Effect>) {
        if self.bot_typing != typing {
            self.bot_typing = typing;
            effects.push(Effect::Publish(ChatEvent::Typing(typing)));
        }
    }

    /// Start the first connection attempt. No-op unless `Idle`.
    pub fn mount(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state != ConnectionState::Idle {
            return effects;
        }
        info!(session_id = %self.session_id, api_url = %self.config.api_url, "Mounting chat session");
        self.attempts = 1;
        self.set_state(ConnectionState::Connecting, &mut effects);
        effects.push(Effect::OpenChannel { attempt: self.attempts });
        effects
    }

    /// Tear down: cancel the reconnect timer and close the channel.
    pub fn unmount(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::CancelReconnect, Effect::CloseChannel];
        self.set_typing(false, &mut effects);
        self.set_state(ConnectionState::Idle, &mut effects);
        info!(session_id = %self.session_id, "Chat session unmounted");
        effects
    }

    /// Send one user message.
    ///
    /// History is the transcript as it stood before this message; the user
    /// entry is appended immediately and never rolled back.
    pub fn send(&mut self, text: &str) -> (SendOutcome, Vec<Effect>) {
        let mut effects = Vec::new();
        let text = text.trim();
        if text.is_empty() {
            return (SendOutcome::Ignored, effects);
        }

        if self.state != ConnectionState::Connected {
            warn!(session_id = %self.session_id, state = self.state.as_str(), "Send attempted while not connected");
            effects.push(Effect::Publish(ChatEvent::Toast(Toast::error(NOT_CONNECTED_TOAST))));
            self.append(ChatMessage::bot(NOT_CONNECTED_REPLY), &mut effects);
            return (SendOutcome::NotConnected, effects);
        }

        let max = self.config.conversation_id_max.max(1);
        let id = *self
            .conversation_id
            .get_or_insert_with(|| rand::thread_rng().gen_range(1..=max));

        effects.push(Effect::Emit(OutboundEvent::SendMessage(SendMessagePayload {
            msg: text.to_string(),
            id,
            messages: self.messages.clone(),
        })));
        debug!(session_id = %self.session_id, conversation_id = id, history = self.messages.len(), "Sending message");

        self.append(ChatMessage::user(text), &mut effects);
        self.set_typing(true, &mut effects);
        (SendOutcome::Sent, effects)
    }

    /// Feed one transport callback into the state machine.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            TransportEvent::Connected => {
                if self.state != ConnectionState::Connecting {
                    debug!(state = self.state.as_str(), "Ignoring stray connect ack");
                    return effects;
                }
                info!(session_id = %self.session_id, attempt = self.attempts, "Connected to server");
                self.set_state(ConnectionState::Connected, &mut effects);
                if !self.has_connected {
                    self.has_connected = true;
                    effects.push(Effect::Publish(ChatEvent::Toast(Toast::success(CONNECTED_TOAST))));
                }
            }
            TransportEvent::ConnectError(err) | TransportEvent::Disconnected(err) => {
                if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
                    debug!(state = self.state.as_str(), error = %err, "Ignoring transport error");
                    return effects;
                }
                let delay = self.config.reconnect_delay();
                warn!(
                    session_id = %self.session_id,
                    attempt = self.attempts,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Chat transport failed, scheduling reconnect"
                );
                effects.push(Effect::CloseChannel);
                self.set_typing(false, &mut effects);
                self.set_state(ConnectionState::Disconnected, &mut effects);
                effects.push(Effect::Publish(ChatEvent::Toast(Toast::error(format!(
                    "Failed to connect. Retrying in {} seconds...",
                    delay.as_secs_f64()
                )))));
                effects.push(Effect::ScheduleReconnect(delay));
            }
            TransportEvent::Message(message) => {
                if self.state != ConnectionState::Connected {
                    warn!(state = self.state.as_str(), "Dropping server message received outside Connected");
                    return effects;
                }
                self.on_server_message(message, &mut effects);
            }
            TransportEvent::Undecodable { event, error } => {
                warn!(session_id = %self.session_id, event = %event, error = %error, "Dropping undecodable server event");
                if matches!(event.as_str(), RESPONSE_EVENT | VOICE_RESPONSE_EVENT) {
                    self.set_typing(false, &mut effects);
                    effects.push(Effect::Publish(ChatEvent::Toast(Toast::error(UNREADABLE_REPLY_TOAST))));
                }
            }
        }
        effects
    }

    fn merge_info(&mut self, info: &CollegeInfoPartial, effects: &mut Vec<Effect>) {
        let merged = merge_college_info(&self.college_info, info);
        if merged != self.college_info {
            self.college_info = merged;
            effects.push(Effect::Publish(ChatEvent::CollegeInfoUpdated(self.college_info.clone())));
        }
    }

    fn on_server_message(&mut self, message: ServerEvent, effects: &mut Vec<Effect>) {
        match message {
            ServerEvent::Response(payload) => {
                debug!(session_id = %self.session_id, tool_call = %payload.res.tool_call.kind, "Received response");
                self.merge_info(&payload.info, effects);
                let message = payload.to_bot_message(&self.college_info);
                self.append(message, effects);
                self.set_typing(false, effects);
            }
            ServerEvent::VoiceResponse(payload) => {
                debug!(session_id = %self.session_id, "Received voice_response");
                self.merge_info(&payload.info, effects);
                for message in payload.to_messages() {
                    self.append(message, effects);
                }
                self.set_typing(false, effects);
            }
            ServerEvent::Other { name, .. } => {
                debug!(event = %name, "Ignoring unhandled server event");
            }
        }
    }

    /// The reconnect timer fired.
    pub fn reconnect_due(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state != ConnectionState::Disconnected {
            return effects;
        }
        self.attempts += 1;
        info!(session_id = %self.session_id, attempt = self.attempts, "Reconnecting");
        self.set_state(ConnectionState::Connecting, &mut effects);
        effects.push(Effect::OpenChannel { attempt: self.attempts });
        effects
    }

    /// Full-session clear: transcript back to the greeting, college info reset.
    /// The conversation id and the connection are kept.
    pub fn clear(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.messages = vec![Self::greeting(&self.config)];
        self.college_info = CollegeInfo::default();
        self.set_typing(false, &mut effects);
        effects.push(Effect::Publish(ChatEvent::Cleared));
        effects
    }

    /// The `[{user, bot}]` rows expected by the summary endpoint.
    pub fn summary_conversation(&self) -> Vec<SummaryTurn> {
        self.messages
            .iter()
            .filter(|m| !m.content.is_empty())
            .map(|m| match m.sender {
                Sender::User => SummaryTurn { user: m.content.clone(), bot: String::new() },
                Sender::Bot => SummaryTurn { user: String::new(), bot: m.content.clone() },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connected_session() -> ChatSession {
        let mut session = ChatSession::new(ChatConfig::default());
        session.mount();
        session.handle_transport_event(TransportEvent::Connected);
        session
    }

    fn response(value: serde_json::Value) -> TransportEvent {
        TransportEvent::Message(ServerEvent::from_event("response", value).unwrap())
    }

    fn emitted(effects: &[Effect]) -> Vec<&SendMessagePayload> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(OutboundEvent::SendMessage(p)) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_new_session_starts_idle_with_greeting() {
        let session = ChatSession::new(ChatConfig::default());
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].sender, Sender::Bot);
        assert_eq!(session.messages()[0].options, vec!["hello", "engineering", "polytechnic"]);
        assert!(session.session_id().starts_with("session-"));
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_mount_opens_channel_once() {
        let mut session = ChatSession::new(ChatConfig::default());
        let effects = session.mount();
        assert!(effects.contains(&Effect::OpenChannel { attempt: 1 }));
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.mount().is_empty());
    }

    #[test]
    fn test_blank_sends_are_noops() {
        let mut session = connected_session();
        for text in ["", "   ", "\n\t"] {
            let (outcome, effects) = session.send(text);
            assert_eq!(outcome, SendOutcome::Ignored);
            assert!(effects.is_empty());
        }
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_send_while_not_connected_appends_failure_only() {
        let mut session = ChatSession::new(ChatConfig::default());
        session.mount();
        let (outcome, effects) = session.send("hello");
        assert_eq!(outcome, SendOutcome::NotConnected);
        assert!(emitted(&effects).is_empty());
        assert_eq!(session.messages().len(), 2);
        let last = session.messages().last().unwrap();
        assert_eq!(last.sender, Sender::Bot);
        assert_eq!(last.content, NOT_CONNECTED_REPLY);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Publish(ChatEvent::Toast(t)) if t.level == ToastLevel::Error)));
        assert!(!session.bot_typing());
    }

    #[test]
    fn test_send_carries_prior_history_and_stable_id() {
        let mut session = connected_session();
        let (outcome, effects) = session.send("  hello ");
        assert_eq!(outcome, SendOutcome::Sent);
        let sent = emitted(&effects);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg, "hello");
        assert_eq!(sent[0].messages.len(), 1);
        assert!((1..=1000).contains(&sent[0].id));
        assert!(session.bot_typing());

        let first_id = sent[0].id;
        let (_, effects) = session.send("fees?");
        let sent = emitted(&effects);
        assert_eq!(sent[0].id, first_id);
        assert_eq!(sent[0].messages.len(), 2);
        assert_eq!(session.conversation_id(), Some(first_id));
    }

    #[test]
    fn test_hello_round_trip() {
        let mut session = connected_session();
        session.send("hello");
        let effects = session.handle_transport_event(response(json!({
            "res": {"msg": "Hi!", "toolCall": {"type": "none", "events": []}},
            "info": {"name": "ABC College"}
        })));

        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].sender, Sender::User);
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[2].sender, Sender::Bot);
        assert_eq!(messages[2].content, "Hi!");
        assert_eq!(session.college_info().name, "ABC College");
        assert!(!session.bot_typing());
        assert!(effects.contains(&Effect::Publish(ChatEvent::Typing(false))));
    }

    #[test]
    fn test_reply_with_null_tool_call_members_completes_the_turn() {
        let mut session = connected_session();
        session.send("hello");
        session.handle_transport_event(response(json!({
            "res": {"msg": "Hi!", "toolCall": {"type": null, "events": null}},
            "info": {"name": "ABC"}
        })));
        session.handle_transport_event(response(json!({"res": {"msg": 42, "toolCall": "none"}})));

        let messages = session.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].content, "Hi!");
        assert_eq!(messages[3].content, "42");
        assert_eq!(session.college_info().name, "ABC");
        assert!(!session.bot_typing());
    }

    #[test]
    fn test_undecodable_reply_clears_typing_and_toasts() {
        let mut session = connected_session();
        session.send("hello");
        let error = ServerEvent::from_event("response", json!("not an object")).unwrap_err();
        let effects = session.handle_transport_event(TransportEvent::Undecodable {
            event: "response".into(),
            error,
        });
        assert!(!session.bot_typing());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Publish(ChatEvent::Toast(t)) if t.text == UNREADABLE_REPLY_TOAST
        )));
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn test_blanked_cutoff_keeps_showing_retained_table() {
        let mut session = connected_session();
        session.handle_transport_event(response(json!({
            "res": {"msg": "Here are the cutoffs"},
            "info": {"cutoff": {"CSE": {"2023": {"GM": [1, 2]}}}}
        })));
        session.handle_transport_event(response(json!({
            "res": {"msg": "Anything else?"},
            "info": {"cutoff": ""}
        })));
        let messages = session.messages();
        assert_eq!(messages[1].cutoff_rows().len(), 1);
        assert_eq!(messages[2].cutoff_rows().len(), 1);
    }

    #[test]
    fn test_retry_toast_renders_fractional_delay() {
        let config = ChatConfig { reconnect_delay_ms: 2500, ..ChatConfig::default() };
        let mut session = ChatSession::new(config);
        session.mount();
        let effects = session.handle_transport_event(TransportEvent::ConnectError(
            TransportError::Connect("refused".into()),
        ));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Publish(ChatEvent::Toast(t)) if t.text == "Failed to connect. Retrying in 2.5 seconds..."
        )));
    }

    #[test]
    fn test_voice_response_appends_bot_then_user() {
        let mut session = connected_session();
        session.handle_transport_event(TransportEvent::Message(
            ServerEvent::from_event(
                "voice_response",
                json!({"res": {"msg": ["Fees are 1L", "what are the fees"]}, "info": {"fees": "1L"}}),
            )
            .unwrap(),
        ));
        let messages = session.messages();
        assert_eq!(messages[1].sender, Sender::Bot);
        assert_eq!(messages[2].sender, Sender::User);
        assert_eq!(session.college_info().fees, json!("1L"));
    }

    #[test]
    fn test_connect_error_schedules_fixed_reconnect() {
        let mut session = ChatSession::new(ChatConfig::default());
        session.mount();
        for attempt in 2..=5 {
            let effects = session.handle_transport_event(TransportEvent::ConnectError(
                TransportError::Connect("refused".into()),
            ));
            assert_eq!(session.state(), ConnectionState::Disconnected);
            assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_secs(5))));
            assert!(effects.iter().any(|e| matches!(
                e,
                Effect::Publish(ChatEvent::Toast(t)) if t.text == "Failed to connect. Retrying in 5 seconds..."
            )));

            let effects = session.reconnect_due();
            assert_eq!(effects.last(), Some(&Effect::OpenChannel { attempt }));
            assert_eq!(session.state(), ConnectionState::Connecting);
        }
    }

    #[test]
    fn test_connected_toast_only_on_first_connect() {
        let mut session = connected_session();
        session.handle_transport_event(TransportEvent::Disconnected(TransportError::Closed("bye".into())));
        session.reconnect_due();
        let effects = session.handle_transport_event(TransportEvent::Connected);
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::Publish(ChatEvent::Toast(_)))));
    }

    #[test]
    fn test_messages_outside_connected_are_dropped() {
        let mut session = ChatSession::new(ChatConfig::default());
        session.mount();
        let effects = session.handle_transport_event(response(json!({"res": {"msg": "late"}})));
        assert!(effects.is_empty());
        assert_eq!(session.messages().len(), 1);
    }

    #[test]
    fn test_unmount_cancels_and_ignores_late_events() {
        let mut session = ChatSession::new(ChatConfig::default());
        session.mount();
        session.handle_transport_event(TransportEvent::ConnectError(TransportError::Connect("x".into())));
        let effects = session.unmount();
        assert!(effects.contains(&Effect::CancelReconnect));
        assert!(effects.contains(&Effect::CloseChannel));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.reconnect_due().is_empty());
        assert!(session
            .handle_transport_event(TransportEvent::ConnectError(TransportError::Connect("x".into())))
            .is_empty());
    }

    #[test]
    fn test_clear_keeps_conversation_id() {
        let mut session = connected_session();
        session.send("hello");
        session.handle_transport_event(response(json!({"res": {"msg": "Hi!"}, "info": {"name": "ABC"}})));
        let id = session.conversation_id();

        session.clear();
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.college_info(), &CollegeInfo::default());
        assert_eq!(session.conversation_id(), id);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_summary_conversation_rows() {
        let mut session = connected_session();
        session.send("hello");
        session.handle_transport_event(response(json!({"res": {"msg": ""}})));
        session.handle_transport_event(response(json!({"res": {"msg": "Hi!"}})));

        let rows = session.summary_conversation();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], SummaryTurn { user: "hello".into(), bot: String::new() });
        assert_eq!(rows[2].bot, "Hi!");
    }
}
