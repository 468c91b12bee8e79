pub mod client;
pub mod http;
pub mod jsonrpc;
pub mod naming;
pub mod pending;
pub mod result;
pub mod ws;

pub use client::{McpTool, ProtocolClient, ServerProbe};
pub use naming::{decode as decode_tool_name, encode as encode_tool_name, is_mcp_name};
pub use result::normalize_tool_result;
