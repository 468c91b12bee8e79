//! Tool names exposed to the model: `mcp_<serverId>_<originalToolName>`.

use pagepilot_core::{Error, Result};

pub const MCP_PREFIX: &str = "mcp_";

pub fn encode(server_id: &str, tool_name: &str) -> String {
    format!("{}{}_{}", MCP_PREFIX, server_id, tool_name)
}

pub fn is_mcp_name(name: &str) -> bool {
    name.starts_with(MCP_PREFIX)
}

/// Split a prefixed name back into `(server_id, tool_name)`.
///
/// The split happens at the first underscore after the prefix, so a server id
/// that itself contains `_` cannot be recovered from the name alone. Callers
/// resolve names against the discovered catalog first and only fall back to
/// this.
pub fn decode(name: &str) -> Result<(String, String)> {
    let rest = name
        .strip_prefix(MCP_PREFIX)
        .ok_or_else(|| Error::Routing(format!("Malformed tool name '{}': missing '{}' prefix", name, MCP_PREFIX)))?;
    match rest.split_once('_') {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => {
            Ok((server.to_string(), tool.to_string()))
        }
        _ => Err(Error::Routing(format!("Malformed tool name '{}'", name))),
    }
}
