//! # College Info Merging
//!
//! The backend streams partial college information on every turn, omitting or
//! blanking fields it did not touch. [`merge_college_info`] folds one partial
//! update into the current record so that a populated field never regresses to
//! empty because of a late or partial message.
//!
//! ## Per-field rule:
//! A new value replaces the old one only if it is non-empty, differs from the
//! old value and has the expected type:
//! - `name`, `course`, `details` must be JSON strings
//! - `fees`, `scholarships`, `cutoff` accept any defined JSON value
//!
//! "Empty" means missing, `null`, `""`, `[]` or `{}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Accumulated knowledge about the college under discussion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollegeInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub fees: Value,
    #[serde(default)]
    pub scholarships: Value,
    #[serde(default)]
    pub cutoff: Value,
    #[serde(default)]
    pub details: String,
}

/// The `info` object of a server message, kept untyped so that wrong-typed
/// fields can be detected and ignored instead of failing the whole payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollegeInfoPartial(pub serde_json::Map<String, Value>);

impl CollegeInfoPartial {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Build a partial from any JSON value; non-objects yield an empty partial.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

/// Whether a JSON value carries no information.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

impl CollegeInfo {
    /// Fields that currently hold a non-empty value.
    pub fn populated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if !self.name.is_empty() {
            fields.push("name");
        }
        if !self.course.is_empty() {
            fields.push("course");
        }
        if !is_empty_value(&self.fees) {
            fields.push("fees");
        }
        if !is_empty_value(&self.scholarships) {
            fields.push("scholarships");
        }
        if !is_empty_value(&self.cutoff) {
            fields.push("cutoff");
        }
        if !self.details.is_empty() {
            fields.push("details");
        }
        fields
    }
}

/// Merge a partial update into `old`, returning the merged record.
///
/// Pure and total: no field of the result is empty unless it was already empty
/// in `old` and the update offered nothing usable.
pub fn merge_college_info(old: &CollegeInfo, new: &CollegeInfoPartial) -> CollegeInfo {
    CollegeInfo {
        name: merge_string(&old.name, new.get("name")),
        course: merge_string(&old.course, new.get("course")),
        fees: merge_any(&old.fees, new.get("fees")),
        scholarships: merge_any(&old.scholarships, new.get("scholarships")),
        cutoff: merge_any(&old.cutoff, new.get("cutoff")),
        details: merge_string(&old.details, new.get("details")),
    }
}

fn merge_string(old: &str, candidate: Option<&Value>) -> String {
    match candidate {
        Some(Value::String(s)) if !s.is_empty() && s != old => s.clone(),
        _ => old.to_string(),
    }
}

fn merge_any(old: &Value, candidate: Option<&Value>) -> Value {
    match candidate {
        Some(value) if !is_empty_value(value) && value != old => value.clone(),
        _ => old.clone(),
    }
}
