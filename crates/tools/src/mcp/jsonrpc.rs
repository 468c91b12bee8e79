use pagepilot_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

// ─── JSON-RPC types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    /// A request without an id; the server sends no reply.
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    /// Present on server-initiated requests and notifications.
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Numeric correlation id. Servers that echo the id as a string are accepted.
    pub fn correlation_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    pub fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(Error::Protocol {
                code: err.code,
                message: err.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

// ─── Inbound decoding ────────────────────────────────────────────────────────

/// Decode an inbound body into JSON-RPC messages.
///
/// Handles a plain JSON object, a batch array, and SSE framing (`data:` lines,
/// events separated by blank lines). Framing is chosen from the content type
/// when given, otherwise from the body shape. Undecodable pieces are logged
/// and skipped.
pub fn parse_inbound(body: &str, content_type: Option<&str>) -> Vec<JsonRpcResponse> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let is_sse = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
        .unwrap_or(false)
        || looks_like_sse(trimmed);

    let payloads = if is_sse {
        sse_payloads(body)
    } else {
        vec![trimmed.to_string()]
    };

    let mut messages = Vec::new();
    for payload in payloads {
        match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Array(items)) => {
                for item in items {
                    push_message(&mut messages, item);
                }
            }
            Ok(value) => push_message(&mut messages, value),
            Err(e) => {
                warn!(error = %e, payload = %crate::safe_truncate(&payload, 200), "MCP: dropping malformed inbound payload");
            }
        }
    }
    messages
}

fn looks_like_sse(body: &str) -> bool {
    body.starts_with("data:") || body.starts_with("event:") || body.starts_with("id:") || body.starts_with(':')
}

fn push_message(out: &mut Vec<JsonRpcResponse>, value: Value) {
    if !value.is_object() {
        warn!(value = %value, "MCP: dropping non-object JSON-RPC message");
        return;
    }
    match serde_json::from_value::<JsonRpcResponse>(value) {
        Ok(msg) => out.push(msg),
        Err(e) => warn!(error = %e, "MCP: dropping undecodable JSON-RPC message"),
    }
}

/// Collect the `data:` payload of every SSE event in `body`.
fn sse_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut event_data = String::new();

    for raw in body.lines() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            if !event_data.is_empty() {
                payloads.push(std::mem::take(&mut event_data));
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            if !event_data.is_empty() {
                event_data.push('\n');
            }
            event_data.push_str(data.strip_prefix(' ').unwrap_or(data));
        } else if line.starts_with(':') {
            // comment / keep-alive
        } else {
            debug!(line = %line, "MCP: ignoring SSE field");
        }
    }
    if !event_data.is_empty() {
        payloads.push(event_data);
    }
    payloads
}
