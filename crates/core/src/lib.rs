pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{Config, McpTransport, ServerAuth, ServerConfig};
pub use error::{Error, Result};
pub use paths::Paths;
pub use types::{ActionResult, McpToolMetadata, ToolDescriptor, ToolId, ToolOrigin};
