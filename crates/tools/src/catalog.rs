use std::collections::HashSet;

use pagepilot_core::{Result, ToolDescriptor, ToolId, ToolOrigin};
use serde_json::{json, Value};
use tracing::warn;

use crate::mcp::naming;

/// Tools offered to the model for one step: native actions followed by
/// discovered MCP tools.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new(native: Vec<ToolDescriptor>, mcp: Vec<ToolDescriptor>) -> Self {
        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(native.len() + mcp.len());
        for tool in native.into_iter().chain(mcp) {
            if !seen.insert(tool.name.clone()) {
                warn!(tool = %tool.name, "Duplicate tool name in catalog, keeping the first");
                continue;
            }
            tools.push(tool);
        }
        Self { tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn mcp_count(&self) -> usize {
        self.tools.iter().filter(|t| t.origin == ToolOrigin::Mcp).count()
    }

    /// Resolve an action name to its routing key. Catalog entries win; names
    /// not in the catalog fall back to the `mcp_` convention, and anything
    /// else is treated as a native action.
    pub fn route(&self, name: &str) -> Result<ToolId> {
        if let Some(tool) = self.get(name) {
            return Ok(tool.id.clone());
        }
        if naming::is_mcp_name(name) {
            let (server_id, tool_name) = naming::decode(name)?;
            return Ok(ToolId::mcp(server_id, tool_name));
        }
        Ok(ToolId::native(name))
    }

    pub fn function_schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.to_function_schema()).collect()
    }

    /// Compact listing for the prompt: one line per tool with its parameters.
    pub fn describe_for_prompt(&self) -> String {
        let mut out = String::new();
        for (title, origin) in [("Browser actions", ToolOrigin::Native), ("External tools (MCP)", ToolOrigin::Mcp)] {
            let group: Vec<&ToolDescriptor> = self.tools.iter().filter(|t| t.origin == origin).collect();
            if group.is_empty() {
                continue;
            }
            out.push_str(&format!("{}:\n", title));
            for tool in group {
                out.push_str(&format!("- {}: {}", tool.name, tool.description));
                let params = parameter_names(&tool.parameter_schema);
                if !params.is_empty() {
                    out.push_str(&format!(" (params: {})", params.join(", ")));
                }
                out.push('\n');
            }
        }
        out
    }
}

fn parameter_names(schema: &Value) -> Vec<String> {
    let required: HashSet<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    schema
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| {
            props
                .keys()
                .map(|k| {
                    if required.contains(k.as_str()) {
                        k.clone()
                    } else {
                        format!("{}?", k)
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Descriptors for the standard browser actions a native executor provides.
pub fn browser_actions() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::native(
            "navigate",
            "Open a URL in the current tab",
            json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}),
        ),
        ToolDescriptor::native(
            "click",
            "Click an element by CSS selector or visible text",
            json!({"type": "object", "properties": {"selector": {"type": "string"}, "text": {"type": "string"}}}),
        ),
        ToolDescriptor::native(
            "type_text",
            "Type text into an input field",
            json!({"type": "object", "properties": {"selector": {"type": "string"}, "text": {"type": "string"}, "submit": {"type": "boolean"}}, "required": ["selector", "text"]}),
        ),
        ToolDescriptor::native(
            "press_key",
            "Press a keyboard key (Enter, Escape, Tab, ...)",
            json!({"type": "object", "properties": {"key": {"type": "string"}}, "required": ["key"]}),
        ),
        ToolDescriptor::native(
            "scroll",
            "Scroll the page up or down",
            json!({"type": "object", "properties": {"direction": {"type": "string", "enum": ["up", "down"]}, "amount": {"type": "integer"}}}),
        ),
        ToolDescriptor::native(
            "wait",
            "Wait for a number of milliseconds",
            json!({"type": "object", "properties": {"ms": {"type": "integer"}}}),
        ),
        ToolDescriptor::native(
            "go_back",
            "Go back in history",
            json!({"type": "object", "properties": {}}),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagepilot_core::McpToolMetadata;

    fn mcp_tool(server: &str, tool: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: naming::encode(server, tool),
            description: format!("{} on {}", tool, server),
            parameter_schema: json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
            origin: ToolOrigin::Mcp,
            mcp_metadata: Some(McpToolMetadata {
                server_url: "http://localhost/mcp".into(),
                server_id: server.into(),
                server_name: server.into(),
                original_tool_name: tool.into(),
            }),
            id: ToolId::mcp(server, tool),
        }
    }

    #[test]
    fn test_route_prefers_catalog_identity() {
        // An underscore in the server id only routes correctly through the catalog.
        let catalog = ToolCatalog::new(browser_actions(), vec![mcp_tool("my_fs", "read")]);
        assert_eq!(catalog.route("mcp_my_fs_read").unwrap(), ToolId::mcp("my_fs", "read"));
        assert_eq!(catalog.route("mcp_other_x").unwrap(), ToolId::mcp("other", "x"));
        assert_eq!(catalog.route("click").unwrap(), ToolId::native("click"));
        assert!(catalog.route("mcp_bad").is_err());
    }

    #[test]
    fn test_duplicates_keep_first() {
        let catalog = ToolCatalog::new(browser_actions(), vec![mcp_tool("fs1", "read"), mcp_tool("fs1", "read")]);
        assert_eq!(catalog.len(), browser_actions().len() + 1);
        assert_eq!(catalog.mcp_count(), 1);
    }

    #[test]
    fn test_prompt_listing() {
        let catalog = ToolCatalog::new(browser_actions(), vec![mcp_tool("fs1", "write_file")]);
        let text = catalog.describe_for_prompt();
        assert!(text.contains("Browser actions:\n- navigate: Open a URL in the current tab (params: url)"));
        assert!(text.contains("External tools (MCP):\n- mcp_fs1_write_file: write_file on fs1 (params: path)"));
        assert_eq!(catalog.function_schemas().len(), catalog.len());
    }
}
