//! Parsing of the model's reply into an [`AgentDecision`].
//!
//! Models wrap JSON in Markdown fences, prepend prose, or rename fields. The
//! parser extracts the first well-formed object and reads it leniently;
//! anything unusable becomes the neutral retry decision.

use pagepilot_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

const RETRY_THOUGHT: &str = "I could not produce a usable decision. Let me try again.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    #[default]
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAction {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    #[serde(default)]
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<DecisionAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub status: DecisionStatus,
}

impl AgentDecision {
    /// The neutral decision: no action, not complete.
    pub fn retry() -> Self {
        Self {
            thought: RETRY_THOUGHT.to_string(),
            ..Default::default()
        }
    }

    pub fn is_retry(&self) -> bool {
        self.thought == RETRY_THOUGHT && self.action.is_none() && !self.complete
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let json = extract_json_object(raw)
            .ok_or_else(|| Error::Parse("no JSON object in model reply".to_string()))?;
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::Parse(format!("invalid decision JSON: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Parse("decision is not a JSON object".to_string()))?;
        let decision = Self::from_object(obj);
        if decision.thought.is_empty() && decision.action.is_none() && !decision.complete {
            return Err(Error::Parse("decision has no thought, action or completion".to_string()));
        }
        Ok(decision)
    }

    /// Parse, falling back to [`AgentDecision::retry`] on any failure.
    pub fn parse_or_retry(raw: &str) -> Self {
        match Self::parse(raw) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, preview = %preview(raw), "Unparseable model reply, retrying");
                Self::retry()
            }
        }
    }

    fn from_object(obj: &Map<String, Value>) -> Self {
        let thought = string_field(obj, &["thought", "thinking", "reasoning"]).unwrap_or_default();
        let description = string_field(obj, &["description"]);
        let complete = obj
            .get("complete")
            .or_else(|| obj.get("done"))
            .map(truthy)
            .unwrap_or(false);
        let answer = obj
            .get("answer")
            .or_else(|| obj.get("final_answer"))
            .and_then(|v| match v {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            });
        let status = match obj.get("status").and_then(|v| v.as_str()).map(str::to_lowercase) {
            Some(s) if matches!(s.as_str(), "failed" | "failure" | "fail" | "error") => DecisionStatus::Failed,
            _ => DecisionStatus::Success,
        };

        Self {
            thought,
            action: action_field(obj),
            description,
            complete,
            answer,
            status,
        }
    }
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn params_field(obj: &Map<String, Value>) -> Value {
    ["params", "parameters", "arguments", "args", "input"]
        .iter()
        .find_map(|k| obj.get(*k))
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// `"action": {"name": ..., "params": ...}` or `"action": "name"` with params
/// beside it.
fn action_field(obj: &Map<String, Value>) -> Option<DecisionAction> {
    match obj.get("action")? {
        Value::Object(action) => {
            let name = string_field(action, &["name", "tool", "type"])?;
            Some(DecisionAction {
                name,
                params: params_field(action),
            })
        }
        Value::String(name) if !name.trim().is_empty() => Some(DecisionAction {
            name: name.trim().to_string(),
            params: params_field(obj),
        }),
        _ => None,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "yes"),
        _ => false,
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(120).collect()
}

/// Locate the first well-formed JSON object in `text`: a fenced code block
/// first, then each `{` in turn matched by brace depth.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(fenced) = fenced_block(trimmed) {
        if let Some(obj) = scan_objects(fenced) {
            return Some(obj);
        }
    }
    scan_objects(trimmed)
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn scan_objects(text: &str) -> Option<&str> {
    let mut offset = 0;
    while let Some(rel) = text[offset..].find('{') {
        let start = offset + rel;
        if let Some(end) = matching_brace(&text[start..]) {
            let candidate = &text[start..start + end + 1];
            if serde_json::from_str::<Value>(candidate).map(|v| v.is_object()).unwrap_or(false) {
                return Some(candidate);
            }
        }
        offset = start + 1;
    }
    None
}

/// Byte index of the brace closing the one at index 0, skipping braces inside
/// string literals.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
