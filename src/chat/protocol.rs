//! # Chat Wire Protocol
//!
//! Typed payloads for the events exchanged with the conversational backend.
//!
//! ## Events:
//! - **Client → Server** `send_message`: `{ msg, id, messages }`
//! - **Server → Client** `response`: `{ res: { msg, toolCall }, info }`
//! - **Server → Client** `voice_response`: `{ res: { msg: [bot, user], toolCall }, info }`
//!
//! Server payloads are decoded leniently: missing or `null` members fall back
//! to defaults, and per-field type problems inside `info` are left to the merge
//! rule instead of rejecting the message.

use crate::chat::college_info::{is_empty_value, CollegeInfo, CollegeInfoPartial};
use crate::chat::message::{ChatMessage, CutoffTable, Sender, ToolCall};
use crate::error::ProtocolDecodeError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const SEND_MESSAGE_EVENT: &str = "send_message";
pub const RESPONSE_EVENT: &str = "response";
pub const VOICE_RESPONSE_EVENT: &str = "voice_response";

/// Payload of the `send_message` event. `messages` is the full transcript as
/// it stood before this message was appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub msg: String,
    pub id: u32,
    pub messages: Vec<ChatMessage>,
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    SendMessage(SendMessagePayload),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::SendMessage(_) => SEND_MESSAGE_EVENT,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            OutboundEvent::SendMessage(payload) => {
                serde_json::to_value(payload).unwrap_or(Value::Null)
            }
        }
    }
}

/// Decode `T`, falling back to its default when the member is `null` or has
/// the wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

fn text_of(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Any JSON value as text; non-strings are rendered as JSON.
fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Value::deserialize(deserializer).map(text_of)
}

fn text_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().map(text_of).collect(),
        Value::Null => Vec::new(),
        other => vec![text_of(other)],
    })
}

/// The `res` member of a `response` event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseBody {
    #[serde(default, deserialize_with = "text")]
    pub msg: String,
    #[serde(rename = "toolCall", default)]
    pub tool_call: ToolCall,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub dropdown_items: Option<Value>,
    #[serde(default)]
    pub link: Option<Value>,
    #[serde(default)]
    pub cutoff: Option<Value>,
    #[serde(default)]
    pub similarity: Option<Value>,
    #[serde(default)]
    pub source: Option<Value>,
}

/// A `response` event: one bot reply plus partial college info.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponsePayload {
    #[serde(default, deserialize_with = "lenient")]
    pub res: ResponseBody,
    #[serde(default, deserialize_with = "lenient")]
    pub info: CollegeInfoPartial,
}

/// The `res` member of a `voice_response` event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VoiceResponseBody {
    #[serde(default, deserialize_with = "text_list")]
    pub msg: Vec<String>,
    #[serde(rename = "toolCall", default)]
    pub tool_call: ToolCall,
}

/// A `voice_response` event: a synthesized bot/user turn pair injected by the
/// voice pipeline.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VoiceResponsePayload {
    #[serde(default, deserialize_with = "lenient")]
    pub res: VoiceResponseBody,
    #[serde(default, deserialize_with = "lenient")]
    pub info: CollegeInfoPartial,
}

/// Events received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Response(ResponsePayload),
    VoiceResponse(VoiceResponsePayload),
    /// Any event this client does not consume.
    Other { name: String, payload: Value },
}

impl ServerEvent {
    /// Decode a named event and its first argument.
    pub fn from_event(name: &str, payload: Value) -> Result<Self, ProtocolDecodeError> {
        match name {
            RESPONSE_EVENT => serde_json::from_value(payload)
                .map(ServerEvent::Response)
                .map_err(|e| ProtocolDecodeError::Packet(format!("bad `response` payload: {e}"))),
            VOICE_RESPONSE_EVENT => serde_json::from_value(payload)
                .map(ServerEvent::VoiceResponse)
                .map_err(|e| {
                    ProtocolDecodeError::Packet(format!("bad `voice_response` payload: {e}"))
                }),
            other => Ok(ServerEvent::Other {
                name: other.to_string(),
                payload,
            }),
        }
    }
}

/// Prefer the member from `res`, fall back to the same key in `info`.
fn pick<'a>(res: &'a Option<Value>, info: &'a CollegeInfoPartial, key: &str) -> Option<&'a Value> {
    res.as_ref()
        .filter(|v| !v.is_null())
        .or_else(|| info.get(key).filter(|v| !v.is_null()))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn cutoff_table(value: Option<&Value>) -> CutoffTable {
    value
        .and_then(|v| serde_json::from_value::<CutoffTable>(v.clone()).ok())
        .unwrap_or_default()
}

impl ResponsePayload {
    /// Build the bot transcript entry for this reply. `merged` is the college
    /// info after this payload's `info` was merged; its cutoff is shown when
    /// `res` carries none.
    pub fn to_bot_message(&self, merged: &CollegeInfo) -> ChatMessage {
        let res = &self.res;
        let info = &self.info;
        let cutoff = res
            .cutoff
            .as_ref()
            .filter(|v| !is_empty_value(v))
            .unwrap_or(&merged.cutoff);
        ChatMessage {
            sender: Sender::Bot,
            content: res.msg.clone(),
            tool_call: res.tool_call.clone(),
            options: string_list(pick(&res.options, info, "options")),
            dropdown_items: string_list(pick(&res.dropdown_items, info, "dropdown_items")),
            link: non_empty_string(pick(&res.link, info, "link")),
            cutoff: cutoff_table(Some(cutoff)),
            similarity: pick(&res.similarity, info, "similarity").and_then(Value::as_f64),
            source: non_empty_string(pick(&res.source, info, "source")),
        }
    }
}

impl VoiceResponsePayload {
    /// The bot line followed by the user line, each carrying the tool call.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let text = |idx: usize| self.res.msg.get(idx).cloned().unwrap_or_default();
        vec![
            ChatMessage::bot(text(0)).with_tool_call(self.res.tool_call.clone()),
            ChatMessage::user(text(1)).with_tool_call(self.res.tool_call.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::college_info::merge_college_info;
    use crate::chat::message::ToolCallKind;
    use serde_json::json;

    #[test]
    fn test_send_message_payload_shape() {
        let event = OutboundEvent::SendMessage(SendMessagePayload {
            msg: "hello".into(),
            id: 42,
            messages: vec![ChatMessage::bot("welcome")],
        });
        assert_eq!(event.name(), "send_message");
        let payload = event.payload();
        assert_eq!(payload["msg"], "hello");
        assert_eq!(payload["id"], 42);
        assert_eq!(payload["messages"][0]["sender"], "bot");
    }

    #[test]
    fn test_response_decodes_with_missing_members() {
        let event = ServerEvent::from_event("response", json!({"res": {"msg": "Hi!"}})).unwrap();
        let ServerEvent::Response(payload) = event else {
            panic!("expected response");
        };
        assert_eq!(payload.res.msg, "Hi!");
        assert_eq!(payload.res.tool_call.kind, ToolCallKind::None);
        assert!(payload.info.0.is_empty());

        let event = ServerEvent::from_event("response", json!({"res": {"msg": "x", "toolCall": null}, "info": null}));
        assert!(event.is_ok());
    }

    #[test]
    fn test_bot_message_takes_attachments_from_info() {
        let payload: ResponsePayload = serde_json::from_value(json!({
            "res": {"msg": "Pick a college", "toolCall": {"type": "college_list", "events": []}},
            "info": {
                "name": "ABC",
                "options": ["yes", "no"],
                "dropdown_items": ["ABC", "XYZ"],
                "link": "https://abc.edu",
                "cutoff": {"CSE": {"2023": {"GM": [1, 2]}}},
                "similarity": 0.87,
                "source": "brochure.pdf"
            }
        }))
        .unwrap();

        let merged = merge_college_info(&CollegeInfo::default(), &payload.info);
        let msg = payload.to_bot_message(&merged);
        assert_eq!(msg.sender, Sender::Bot);
        assert_eq!(msg.options, vec!["yes", "no"]);
        assert_eq!(msg.dropdown_items, vec!["ABC", "XYZ"]);
        assert_eq!(msg.link.as_deref(), Some("https://abc.edu"));
        assert_eq!(msg.cutoff_rows().len(), 1);
        assert_eq!(msg.similarity, Some(0.87));
        assert_eq!(msg.source.as_deref(), Some("brochure.pdf"));
    }

    #[test]
    fn test_res_members_win_over_info() {
        let payload: ResponsePayload = serde_json::from_value(json!({
            "res": {"msg": "m", "options": ["from-res"]},
            "info": {"options": ["from-info"], "cutoff": ""}
        }))
        .unwrap();
        let retained = CollegeInfo {
            cutoff: json!({"CSE": {"2023": {"GM": [1, 2]}}}),
            ..Default::default()
        };
        let merged = merge_college_info(&retained, &payload.info);
        let msg = payload.to_bot_message(&merged);
        assert_eq!(msg.options, vec!["from-res"]);
        assert_eq!(msg.cutoff_rows().len(), 1);
    }

    #[test]
    fn test_res_cutoff_wins_over_merged_cutoff() {
        let payload: ResponsePayload = serde_json::from_value(json!({
            "res": {"msg": "m", "cutoff": {"ECE": {"2024": {"GM": [5, 9]}, "2023": {"GM": [6, 10]}}}}
        }))
        .unwrap();
        let merged = CollegeInfo {
            cutoff: json!({"CSE": {"2023": {"GM": [1, 2]}}}),
            ..Default::default()
        };
        let rows = payload.to_bot_message(&merged).cutoff_rows();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.department == "ECE"));
    }

    #[test]
    fn test_response_tolerates_null_and_wrong_typed_members() {
        let event = ServerEvent::from_event(
            "response",
            json!({"res": {"msg": "Hi!", "toolCall": {"type": null, "events": null}}, "info": {"name": "ABC"}}),
        )
        .unwrap();
        let ServerEvent::Response(payload) = event else {
            panic!("expected response");
        };
        assert_eq!(payload.res.tool_call, ToolCall::default());
        assert_eq!(payload.info.get("name"), Some(&json!("ABC")));

        let event = ServerEvent::from_event("response", json!({"res": {"msg": 42}, "info": "none"})).unwrap();
        let ServerEvent::Response(payload) = event else {
            panic!("expected response");
        };
        assert_eq!(payload.res.msg, "42");
        assert!(payload.info.0.is_empty());

        let event = ServerEvent::from_event("response", json!({"res": "oops"})).unwrap();
        assert!(matches!(event, ServerEvent::Response(ref p) if p.res.msg.is_empty()));

        let event = ServerEvent::from_event("voice_response", json!({"res": {"msg": "hello", "toolCall": 3}})).unwrap();
        let ServerEvent::VoiceResponse(payload) = event else {
            panic!("expected voice_response");
        };
        assert_eq!(payload.res.msg, vec!["hello"]);
    }

    #[test]
    fn test_voice_response_yields_bot_then_user() {
        let event = ServerEvent::from_event(
            "voice_response",
            json!({"res": {"msg": ["Sure, here you go", "show me fees"], "toolCall": {"type": "none", "events": []}}, "info": {}}),
        )
        .unwrap();
        let ServerEvent::VoiceResponse(payload) = event else {
            panic!("expected voice_response");
        };
        let messages = payload.to_messages();
        assert_eq!(messages[0].sender, Sender::Bot);
        assert_eq!(messages[0].content, "Sure, here you go");
        assert_eq!(messages[1].sender, Sender::User);
        assert_eq!(messages[1].content, "show me fees");
    }

    #[test]
    fn test_unknown_events_are_preserved() {
        let event = ServerEvent::from_event("ticket_update", json!({"n": 1})).unwrap();
        assert!(matches!(event, ServerEvent::Other { ref name, .. } if name == "ticket_update"));
    }
}
