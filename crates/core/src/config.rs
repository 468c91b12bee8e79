use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Transport used to reach an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    /// Streamable HTTP: JSON-RPC over POST, answered with JSON or SSE framing.
    #[default]
    Sse,
    Websocket,
}

impl McpTransport {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Websocket => "websocket",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerAuth {
    /// Free-form label ("bearer", "apiKey", ...). Informational only.
    #[serde(rename = "type", default)]
    pub kind: String,
    pub header_name: String,
    pub header_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub transport: McpTransport,
    #[serde(default)]
    pub auth: Option<ServerAuth>,
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
}

fn default_server_enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn new(id: &str, url: &str, transport: McpTransport) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            url: url.to_string(),
            transport,
            auth: None,
            enabled: true,
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_scratchpad_entries")]
    pub max_scratchpad_entries: usize,
    /// Pause after each dispatched action before re-observing the page.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Upper bound on page text included in each prompt.
    #[serde(default = "default_page_excerpt_chars")]
    pub page_excerpt_chars: usize,
    /// Observations replayed in the history are clipped to this length.
    #[serde(default = "default_history_observation_chars")]
    pub history_observation_chars: usize,
}

fn default_max_steps() -> u32 {
    20
}

fn default_max_scratchpad_entries() -> usize {
    60
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_page_excerpt_chars() -> usize {
    4000
}

fn default_history_observation_chars() -> usize {
    600
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_scratchpad_entries: default_max_scratchpad_entries(),
            settle_delay_ms: default_settle_delay_ms(),
            page_excerpt_chars: default_page_excerpt_chars(),
            history_observation_chars: default_history_observation_chars(),
        }
    }
}

impl AgentDefaults {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_protocol_version() -> String {
    "2025-03-26".to_string()
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            protocol_version: default_protocol_version(),
            servers: Vec::new(),
        }
    }
}

impl McpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Pause taken after a blocker was dismissed, before the alternate attempt.
    #[serde(default = "default_recovery_pause_ms")]
    pub recovery_pause_ms: u64,
    #[serde(default = "default_enable_blocker_recovery")]
    pub enable_blocker_recovery: bool,
}

fn default_recovery_pause_ms() -> u64 {
    800
}

fn default_enable_blocker_recovery() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            recovery_pause_ms: default_recovery_pause_ms(),
            enable_blocker_recovery: default_enable_blocker_recovery(),
        }
    }
}

impl RetryConfig {
    pub fn recovery_pause(&self) -> Duration {
        Duration::from_millis(self.recovery_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations that would make tool routing ambiguous.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.mcp.servers {
            if server.id.trim().is_empty() {
                return Err(Error::Config(format!("MCP server '{}' has an empty id", server.url)));
            }
            if server.url.trim().is_empty() {
                return Err(Error::Config(format!("MCP server '{}' has an empty url", server.id)));
            }
            if !seen.insert(server.id.as_str()) {
                return Err(Error::Config(format!("duplicate MCP server id '{}'", server.id)));
            }
            if server.id.contains('_') {
                // Tool names are split at the first underscore after `mcp_`.
                warn!(server_id = %server.id, "MCP server id contains '_'; prefixed tool names may not route back to it");
            }
        }
        if self.agent.max_scratchpad_entries < 2 {
            return Err(Error::Config("agent.maxScratchpadEntries must be at least 2".to_string()));
        }
        Ok(())
    }

    pub fn get_server(&self, id: &str) -> Option<&ServerConfig> {
        self.mcp.servers.iter().find(|s| s.id == id)
    }
}
