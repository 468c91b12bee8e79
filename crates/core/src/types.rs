use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Outcome of a native action or an MCP tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: error.clone(),
            data: None,
            error: Some(error),
        }
    }

    /// The most specific failure text available.
    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or(&self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolOrigin {
    Native,
    Mcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolMetadata {
    pub server_url: String,
    pub server_id: String,
    pub server_name: String,
    pub original_tool_name: String,
}

/// Routing key resolved once at discovery time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolId {
    Native { name: String },
    Mcp { server_id: String, tool_name: String },
}

impl ToolId {
    pub fn native(name: impl Into<String>) -> Self {
        ToolId::Native { name: name.into() }
    }

    pub fn mcp(server_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        ToolId::Mcp {
            server_id: server_id.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn is_mcp(&self) -> bool {
        matches!(self, ToolId::Mcp { .. })
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolId::Native { name } => write!(f, "{}", name),
            ToolId::Mcp { server_id, tool_name } => write!(f, "mcp:{}/{}", server_id, tool_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub origin: ToolOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_metadata: Option<McpToolMetadata>,
    pub id: ToolId,
}

impl ToolDescriptor {
    pub fn native(name: &str, description: &str, parameter_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameter_schema,
            origin: ToolOrigin::Native,
            mcp_metadata: None,
            id: ToolId::native(name),
        }
    }

    /// OpenAI-style function schema handed to the completion model.
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameter_schema,
            }
        })
    }
}
