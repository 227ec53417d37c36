//! Transcript entries.
//!
//! A [`ChatMessage`] is immutable once appended; the transcript is append-only
//! and only a full-session clear removes entries.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// Kind of tool call the backend attached to a reply.
///
/// Unknown kinds are preserved verbatim so a newer backend does not break
/// transcript rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolCallKind {
    None,
    CollegeList,
    Other(String),
}

impl From<String> for ToolCallKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "none" => ToolCallKind::None,
            "college_list" => ToolCallKind::CollegeList,
            _ => ToolCallKind::Other(value),
        }
    }
}

impl From<ToolCallKind> for String {
    fn from(kind: ToolCallKind) -> Self {
        kind.as_str().to_string()
    }
}

impl ToolCallKind {
    pub fn as_str(&self) -> &str {
        match self {
            ToolCallKind::None => "none",
            ToolCallKind::CollegeList => "college_list",
            ToolCallKind::Other(name) => name,
        }
    }
}

impl fmt::Display for ToolCallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool-call descriptor: a kind plus ordered, backend-defined events.
///
/// Decoding never fails: a missing, `null` or non-string `type` is
/// [`ToolCallKind::None`] and anything but an array of `events` is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    #[serde(rename = "type")]
    pub kind: ToolCallKind,
    pub events: Vec<Value>,
}

impl ToolCall {
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self::default();
        };
        let kind = match map.remove("type") {
            Some(Value::String(name)) => ToolCallKind::from(name),
            _ => ToolCallKind::None,
        };
        let events = match map.remove("events") {
            Some(Value::Array(events)) => events,
            _ => Vec::new(),
        };
        Self { kind, events }
    }
}

impl<'de> Deserialize<'de> for ToolCall {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

impl Default for ToolCall {
    fn default() -> Self {
        Self {
            kind: ToolCallKind::None,
            events: Vec::new(),
        }
    }
}

/// Admission ranks keyed department → year → category → `[opening, closing]`.
///
/// Rank cells are kept as raw JSON values; the backend sends both numbers and
/// numeric strings.
pub type CutoffTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, (Value, Value)>>>;

/// One flattened row of a [`CutoffTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct CutoffRow {
    pub department: String,
    pub year: String,
    pub category: String,
    pub opening_rank: Value,
    pub closing_rank: Value,
}

/// A single transcript entry, serialized the way the backend expects it in
/// the `messages` history of `send_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Sender,
    pub content: String,
    #[serde(rename = "toolCall", default)]
    pub tool_call: ToolCall,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub dropdown_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub cutoff: CutoffTable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ChatMessage {
    /// A plain user message with no tool call or attachments.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Sender::User, content)
    }

    /// A plain bot message with no tool call or attachments.
    pub fn bot(content: impl Into<String>) -> Self {
        Self::plain(Sender::Bot, content)
    }

    fn plain(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            tool_call: ToolCall::default(),
            options: Vec::new(),
            dropdown_items: Vec::new(),
            link: None,
            cutoff: CutoffTable::new(),
            similarity: None,
            source: None,
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_call = tool_call;
        self
    }

    /// Quick replies are hidden for college lists, which render as a dropdown.
    pub fn visible_options(&self) -> &[String] {
        if self.tool_call.kind == ToolCallKind::CollegeList {
            &[]
        } else {
            &self.options
        }
    }

    /// Flatten the cutoff table into rows in key order.
    pub fn cutoff_rows(&self) -> Vec<CutoffRow> {
        let mut rows = Vec::new();
        for (department, years) in &self.cutoff {
            for (year, categories) in years {
                for (category, (opening, closing)) in categories {
                    rows.push(CutoffRow {
                        department: department.clone(),
                        year: year.clone(),
                        category: category.clone(),
                        opening_rank: opening.clone(),
                        closing_rank: closing.clone(),
                    });
                }
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_kind_round_trips_unknown_names() {
        let call: ToolCall = serde_json::from_value(json!({"type": "event_list", "events": [1]})).unwrap();
        assert_eq!(call.kind, ToolCallKind::Other("event_list".to_string()));
        assert_eq!(serde_json::to_value(&call).unwrap()["type"], "event_list");

        let call: ToolCall = serde_json::from_value(json!({"type": "college_list"})).unwrap();
        assert_eq!(call.kind, ToolCallKind::CollegeList);
        assert!(call.events.is_empty());
    }

    #[test]
    fn test_tool_call_tolerates_null_and_wrong_types() {
        let call: ToolCall = serde_json::from_value(json!({"type": null, "events": null})).unwrap();
        assert_eq!(call, ToolCall::default());

        let call: ToolCall = serde_json::from_value(json!({"type": 7, "events": {"a": 1}})).unwrap();
        assert_eq!(call, ToolCall::default());

        let call: ToolCall = serde_json::from_value(json!("college_list")).unwrap();
        assert_eq!(call.kind, ToolCallKind::None);
    }

    #[test]
    fn test_history_serialization_shape() {
        let msg = ChatMessage::user("hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["sender"], "user");
        assert_eq!(value["content"], "hello");
        assert_eq!(value["toolCall"]["type"], "none");
        assert!(value.get("link").is_none());
    }

    #[test]
    fn test_cutoff_rows_are_flattened_in_key_order() {
        let mut msg = ChatMessage::bot("ranks");
        msg.cutoff = serde_json::from_value(json!({
            "CSE": {"2023": {"GM": [100, 900], "SC": ["2000", "5000"]}},
            "ECE": {"2022": {"GM": [300, 1500]}}
        }))
        .unwrap();

        let rows = msg.cutoff_rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].department, "CSE");
        assert_eq!(rows[0].category, "GM");
        assert_eq!(rows[0].closing_rank, json!(900));
        assert_eq!(rows[1].opening_rank, json!("2000"));
        assert_eq!(rows[2].department, "ECE");
    }

    #[test]
    fn test_college_list_hides_quick_replies() {
        let msg = ChatMessage::bot("pick one")
            .with_options(vec!["a".into()])
            .with_tool_call(ToolCall { kind: ToolCallKind::CollegeList, events: vec![] });
        assert!(msg.visible_options().is_empty());
    }
}
