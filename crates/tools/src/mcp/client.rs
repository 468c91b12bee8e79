use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use pagepilot_core::config::McpConfig;
use pagepilot_core::{
    ActionResult, Error, McpToolMetadata, McpTransport, Result, ServerConfig, ToolDescriptor, ToolId,
    ToolOrigin,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::http::{normalize_endpoint, HttpTransport};
use super::jsonrpc::JsonRpcRequest;
use super::naming;
use super::pending::PendingRequests;
use super::result::normalize_tool_result;
use super::ws::WsConnection;

const CLIENT_NAME: &str = "pagepilot";
const MAX_LIST_PAGES: usize = 64;

/// Message ids are unique across every client in the process.
static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::SeqCst)
}

// ─── MCP tool schema types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "default_input_schema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Result of a connectivity probe against one server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProbe {
    pub server_id: String,
    pub transport: McpTransport,
    pub endpoint: String,
    pub tool_count: usize,
    pub session_id: Option<String>,
    pub elapsed_ms: u64,
}

// ─── Protocol client ──────────────────────────────────────────────────────────

/// MCP client over streamable HTTP and WebSocket.
///
/// Shared as `Arc<ProtocolClient>`; all caches are owned fields behind async
/// locks. Connections are opened lazily per server endpoint and reused.
pub struct ProtocolClient {
    servers: RwLock<Vec<ServerConfig>>,
    request_timeout: Duration,
    connect_timeout: Duration,
    protocol_version: String,
    http: HttpTransport,
    pending: PendingRequests,
    /// endpoint → open socket
    sockets: Mutex<HashMap<String, Arc<WsConnection>>>,
    /// endpoints that completed the `initialize` handshake
    initialized: Mutex<HashSet<String>>,
    /// endpoint → per-endpoint handshake lock
    handshake_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// endpoint → `Mcp-Session-Id`
    sessions: Mutex<HashMap<String, String>>,
    /// server id → last discovered tools
    tools_cache: Mutex<HashMap<String, Vec<ToolDescriptor>>>,
}

impl ProtocolClient {
    pub fn new(config: &McpConfig) -> Result<Self> {
        Ok(Self {
            servers: RwLock::new(config.servers.clone()),
            request_timeout: config.request_timeout(),
            connect_timeout: config.connect_timeout(),
            protocol_version: config.protocol_version.clone(),
            http: HttpTransport::new(config.connect_timeout())?,
            pending: PendingRequests::new(),
            sockets: Mutex::new(HashMap::new()),
            initialized: Mutex::new(HashSet::new()),
            handshake_locks: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            tools_cache: Mutex::new(HashMap::new()),
        })
    }

    pub async fn servers(&self) -> Vec<ServerConfig> {
        self.servers.read().await.clone()
    }

    pub async fn enabled_servers(&self) -> Vec<ServerConfig> {
        self.servers.read().await.iter().filter(|s| s.enabled).cloned().collect()
    }

    /// Replace the server list. Existing connections and caches are torn down.
    pub async fn set_servers(&self, servers: Vec<ServerConfig>) {
        self.close_all().await;
        *self.servers.write().await = servers;
        info!("MCP server list replaced");
    }

    async fn enabled_server(&self, server_id: &str) -> Result<ServerConfig> {
        self.servers
            .read()
            .await
            .iter()
            .find(|s| s.id == server_id && s.enabled)
            .cloned()
            .ok_or_else(|| Error::Routing(format!("Unknown MCP server: {}", server_id)))
    }

    fn endpoint(server: &ServerConfig) -> String {
        match server.transport {
            McpTransport::Sse => normalize_endpoint(&server.url),
            McpTransport::Websocket => server.url.trim().to_string(),
        }
    }

    /// Session id issued by the server's endpoint, if any.
    pub async fn session_id(&self, server_id: &str) -> Option<String> {
        let server = self.enabled_server(server_id).await.ok()?;
        self.sessions.lock().await.get(&Self::endpoint(&server)).cloned()
    }

    pub async fn cached_tools(&self, server_id: &str) -> Option<Vec<ToolDescriptor>> {
        self.tools_cache.lock().await.get(server_id).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.len().await
    }

    // ── transports ──

    /// Socket for `server`, opening a fresh one when none is cached or the
    /// cached one is no longer open.
    async fn socket(&self, server: &ServerConfig, endpoint: &str) -> Result<Arc<WsConnection>> {
        let stale = {
            let mut sockets = self.sockets.lock().await;
            if let Some(existing) = sockets.get(endpoint) {
                if existing.is_open() {
                    return Ok(existing.clone());
                }
            }
            sockets.remove(endpoint)
        };
        if let Some(stale) = stale {
            debug!(server = %server.id, "MCP WebSocket no longer open, reconnecting");
            stale.close().await;
            self.initialized.lock().await.remove(endpoint);
        }

        let connect = WsConnection::connect(&server.id, endpoint, server.auth.as_ref(), self.pending.clone());
        let conn = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(conn)) => Arc::new(conn),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "MCP[{}]: WebSocket connect timed out after {}ms",
                    server.id,
                    self.connect_timeout.as_millis()
                )))
            }
        };
        self.sockets.lock().await.insert(endpoint.to_string(), conn.clone());
        Ok(conn)
    }

    /// Put one envelope on the wire. HTTP replies are routed into the
    /// correlation table before this returns; WebSocket replies arrive via the
    /// socket's reader task.
    async fn transmit(&self, server: &ServerConfig, envelope: &JsonRpcRequest) -> Result<()> {
        let endpoint = Self::endpoint(server);
        match server.transport {
            McpTransport::Websocket => {
                let socket = self.socket(server, &endpoint).await?;
                let text = serde_json::to_string(envelope)?;
                debug!(server = %server.id, method = %envelope.method, id = ?envelope.id, "MCP → ws");
                socket.send(text).await
            }
            McpTransport::Sse => {
                let session = self.sessions.lock().await.get(&endpoint).cloned();
                let reply = match self
                    .http
                    .post(&server.id, &endpoint, server.auth.as_ref(), session.as_deref(), envelope)
                    .await
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        if session.is_some() && e.http_status() == Some(404) {
                            // Server forgot the session; start over on the next call.
                            info!(server = %server.id, "MCP session expired");
                            self.reset_endpoint(&endpoint).await;
                            self.tools_cache.lock().await.remove(&server.id);
                        }
                        return Err(e);
                    }
                };
                if let Some(sid) = reply.session_id {
                    let mut sessions = self.sessions.lock().await;
                    if sessions.get(&endpoint) != Some(&sid) {
                        debug!(server = %server.id, session = %sid, "MCP session established");
                        sessions.insert(endpoint.clone(), sid);
                    }
                }
                for msg in reply.messages {
                    self.pending.dispatch(&server.id, msg).await;
                }
                if let Some(id) = envelope.id {
                    if self.pending.contains(id).await {
                        return Err(Error::Transport(format!(
                            "MCP[{}]: HTTP {} response carried no reply for request {}",
                            server.id, reply.status, id
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    async fn reset_endpoint(&self, endpoint: &str) {
        self.sessions.lock().await.remove(endpoint);
        self.initialized.lock().await.remove(endpoint);
    }

    /// Send a request and wait for its reply, bounded by the request timeout.
    async fn request(&self, server: &ServerConfig, method: &str, params: Option<Value>) -> Result<Value> {
        if matches!(server.transport, McpTransport::Websocket) {
            // Stale-socket teardown rejects everything registered for this
            // server, so it has to happen before this request is registered.
            self.socket(server, &Self::endpoint(server)).await?;
        }
        let id = next_message_id();
        let rx = self.pending.register(id, &server.id).await;
        let guard = self.pending.evict_on_drop(id);
        let envelope = JsonRpcRequest::call(id, method, params);

        let exchange = async {
            self.transmit(server, &envelope).await?;
            rx.await
                .map_err(|_| Error::Transport(format!("MCP[{}]: request {} abandoned", server.id, id)))?
        };

        let outcome = match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "MCP[{}]: {} timed out after {}ms",
                server.id,
                method,
                self.request_timeout.as_millis()
            ))),
        };
        // No-op when the reply already settled the entry.
        self.pending.evict(id).await;
        guard.disarm();
        outcome
    }

    async fn notify(&self, server: &ServerConfig, method: &str, params: Option<Value>) -> Result<()> {
        let envelope = JsonRpcRequest::notification(method, params);
        match tokio::time::timeout(self.request_timeout, self.transmit(server, &envelope)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("MCP[{}]: {} timed out", server.id, method))),
        }
    }

    // ── handshake ──

    async fn ensure_initialized(&self, server: &ServerConfig) -> Result<()> {
        let endpoint = Self::endpoint(server);
        if self.is_ready(server, &endpoint).await {
            return Ok(());
        }

        let lock = {
            let mut locks = self.handshake_locks.lock().await;
            locks.entry(endpoint.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;
        if self.is_ready(server, &endpoint).await {
            return Ok(());
        }

        match tokio::time::timeout(self.connect_timeout, self.handshake(server)).await {
            Ok(Ok(())) => {
                self.initialized.lock().await.insert(endpoint);
                Ok(())
            }
            Ok(Err(e)) => {
                self.drop_connection(&endpoint).await;
                self.tools_cache.lock().await.remove(&server.id);
                Err(e)
            }
            Err(_) => {
                self.drop_connection(&endpoint).await;
                self.tools_cache.lock().await.remove(&server.id);
                Err(Error::Timeout(format!(
                    "MCP[{}]: connection timed out after {}ms",
                    server.id,
                    self.connect_timeout.as_millis()
                )))
            }
        }
    }

    async fn is_ready(&self, server: &ServerConfig, endpoint: &str) -> bool {
        let initialized = self.initialized.lock().await.contains(endpoint);
        initialized && self.connection_alive(server, endpoint).await
    }

    async fn connection_alive(&self, server: &ServerConfig, endpoint: &str) -> bool {
        match server.transport {
            McpTransport::Sse => true,
            McpTransport::Websocket => self
                .sockets
                .lock()
                .await
                .get(endpoint)
                .map(|s| s.is_open())
                .unwrap_or(false),
        }
    }

    async fn drop_connection(&self, endpoint: &str) {
        let socket = self.sockets.lock().await.remove(endpoint);
        if let Some(socket) = socket {
            socket.close().await;
        }
        self.reset_endpoint(endpoint).await;
    }

    /// MCP initialize + initialized notification.
    async fn handshake(&self, server: &ServerConfig) -> Result<()> {
        let params = json!({
            "protocolVersion": self.protocol_version,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = self.request(server, "initialize", Some(params)).await?;
        let server_version = result
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        info!(server = %server.id, transport = server.transport.name(), protocol = %server_version, "MCP initialized");

        if let Err(e) = self.notify(server, "notifications/initialized", None).await {
            warn!(server = %server.id, error = %e, "MCP initialized notification failed");
        }
        Ok(())
    }

    // ── discovery ──

    /// `tools/list` on one server, following `nextCursor` pages.
    pub async fn discover_server_tools(&self, server: &ServerConfig) -> Result<Vec<ToolDescriptor>> {
        self.ensure_initialized(server).await?;

        let endpoint = Self::endpoint(server);
        let mut descriptors = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request(server, "tools/list", params).await?;

            let tools: Vec<McpTool> = serde_json::from_value(result.get("tools").cloned().unwrap_or(Value::Array(vec![])))
                .map_err(|e| Error::Parse(format!("MCP[{}]: parse tools: {}", server.id, e)))?;
            for tool in tools {
                descriptors.push(Self::descriptor(server, &endpoint, tool));
            }

            match result.get("nextCursor").and_then(|v| v.as_str()) {
                Some(next) if !next.is_empty() && seen_cursors.insert(next.to_string()) => {
                    cursor = Some(next.to_string());
                }
                _ => break,
            }
        }

        debug!(server = %server.id, count = descriptors.len(), "MCP tools loaded");
        self.tools_cache
            .lock()
            .await
            .insert(server.id.clone(), descriptors.clone());
        Ok(descriptors)
    }

    fn descriptor(server: &ServerConfig, endpoint: &str, tool: McpTool) -> ToolDescriptor {
        ToolDescriptor {
            name: naming::encode(&server.id, &tool.name),
            description: tool.description.unwrap_or_default(),
            parameter_schema: tool.input_schema,
            origin: ToolOrigin::Mcp,
            mcp_metadata: Some(McpToolMetadata {
                server_url: endpoint.to_string(),
                server_id: server.id.clone(),
                server_name: server.display_name().to_string(),
                original_tool_name: tool.name.clone(),
            }),
            id: ToolId::mcp(server.id.clone(), tool.name),
        }
    }

    /// Tools from every enabled server, in configuration order. Servers with
    /// cached tools are not asked again. A failing server contributes nothing
    /// and does not affect the others.
    pub async fn discover_all_tools(&self) -> Vec<ToolDescriptor> {
        let servers = self.enabled_servers().await;
        let lists = join_all(servers.iter().map(|server| async move {
            if let Some(cached) = self.cached_tools(&server.id).await {
                return cached;
            }
            match self.discover_server_tools(server).await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %server.id, error = %e, "MCP tool discovery failed");
                    Vec::new()
                }
            }
        }))
        .await;
        lists.into_iter().flatten().collect()
    }

    // ── invocation ──

    /// Invoke a tool by its prefixed name (`mcp_<server>_<tool>`).
    pub async fn invoke_tool(&self, prefixed_name: &str, args: Value) -> ActionResult {
        match naming::decode(prefixed_name) {
            Ok((server_id, tool_name)) => self.invoke(&ToolId::mcp(server_id, tool_name), args).await,
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    /// Invoke a routed tool. Every failure is reported in the result.
    pub async fn invoke(&self, id: &ToolId, args: Value) -> ActionResult {
        match self.try_invoke(id, args).await {
            Ok(result) => result,
            Err(e) => {
                let tool = match id {
                    ToolId::Mcp { tool_name, .. } => tool_name.as_str(),
                    ToolId::Native { name } => name.as_str(),
                };
                warn!(tool = %id, error = %e, "MCP tool call failed");
                match e {
                    Error::Routing(_) => ActionResult::failure(e.to_string()),
                    other => ActionResult::failure(format!("MCP tool \"{}\" failed: {}", tool, other)),
                }
            }
        }
    }

    pub async fn try_invoke(&self, id: &ToolId, args: Value) -> Result<ActionResult> {
        let (server_id, tool_name) = match id {
            ToolId::Mcp { server_id, tool_name } => (server_id, tool_name),
            ToolId::Native { name } => {
                return Err(Error::Routing(format!("'{}' is not an MCP tool", name)));
            }
        };
        let server = self.enabled_server(server_id).await?;
        self.ensure_initialized(&server).await?;

        info!(server = %server.id, tool = %tool_name, "Executing MCP tool");
        let params = json!({
            "name": tool_name,
            "arguments": if args.is_null() { json!({}) } else { args },
        });
        let result = self.request(&server, "tools/call", Some(params)).await?;
        Ok(normalize_tool_result(tool_name, &result))
    }

    /// Handshake and list tools on one server, bypassing the enabled flag.
    pub async fn test_server(&self, server_id: &str) -> Result<ServerProbe> {
        let server = self
            .servers
            .read()
            .await
            .iter()
            .find(|s| s.id == server_id)
            .cloned()
            .ok_or_else(|| Error::Routing(format!("Unknown MCP server: {}", server_id)))?;

        let started = Instant::now();
        let tools = self.discover_server_tools(&server).await?;
        let endpoint = Self::endpoint(&server);
        let session_id = self.sessions.lock().await.get(&endpoint).cloned();
        Ok(ServerProbe {
            server_id: server.id.clone(),
            transport: server.transport,
            endpoint,
            tool_count: tools.len(),
            session_id,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    // ── teardown ──

    /// Reject in-flight requests and clear every cache.
    pub async fn close_all(&self) {
        let rejected = self.pending.reject_all("client closed").await;
        if rejected > 0 {
            error!(rejected, "MCP client closed with requests in flight");
        }
        let sockets: Vec<_> = self.sockets.lock().await.drain().map(|(_, s)| s).collect();
        for socket in sockets {
            socket.close().await;
        }
        self.initialized.lock().await.clear();
        self.handshake_locks.lock().await.clear();
        self.sessions.lock().await.clear();
        self.tools_cache.lock().await.clear();
        debug!("MCP client closed");
    }
}
