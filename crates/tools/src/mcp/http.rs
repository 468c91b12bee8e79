use std::time::Duration;

use pagepilot_core::{Error, Result, ServerAuth};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use super::jsonrpc::{parse_inbound, JsonRpcRequest, JsonRpcResponse};

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable-HTTP endpoint for a configured server URL.
///
/// `…/sse` becomes `…/mcp`; any other URL not already ending in `mcp` gets
/// `/mcp` appended.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if let Some(base) = trimmed.strip_suffix("/sse") {
        return format!("{}/mcp", base);
    }
    if trimmed.ends_with("mcp") {
        return trimmed.to_string();
    }
    format!("{}/mcp", trimmed)
}

#[derive(Debug)]
pub struct HttpReply {
    pub status: StatusCode,
    pub session_id: Option<String>,
    pub messages: Vec<JsonRpcResponse>,
}

/// POSTs JSON-RPC envelopes and decodes JSON or SSE-framed replies.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn post(
        &self,
        server_id: &str,
        endpoint: &str,
        auth: Option<&ServerAuth>,
        session_id: Option<&str>,
        envelope: &JsonRpcRequest,
    ) -> Result<HttpReply> {
        let headers = build_headers(auth, session_id)?;
        debug!(server = %server_id, endpoint, method = %envelope.method, id = ?envelope.id, "MCP → POST");

        let response = self
            .client
            .post(endpoint)
            .headers(headers)
            .json(envelope)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("MCP[{}]: POST {} failed: {}", server_id, endpoint, e)))?;

        let status = response.status();
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("MCP[{}]: failed to read response body: {}", server_id, e)))?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: format!("MCP[{}]: {}", server_id, crate::safe_truncate(body.trim(), 200)),
            });
        }

        debug!(server = %server_id, status = %status, bytes = body.len(), "MCP ← response");
        Ok(HttpReply {
            status,
            session_id,
            messages: parse_inbound(&body, content_type.as_deref()),
        })
    }
}

fn build_headers(auth: Option<&ServerAuth>, session_id: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));

    if let Some(auth) = auth {
        let name = HeaderName::from_bytes(auth.header_name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid auth header name '{}': {}", auth.header_name, e)))?;
        let value = HeaderValue::from_str(&auth.header_value)
            .map_err(|e| Error::Config(format!("invalid auth header value: {}", e)))?;
        headers.insert(name, value);
    }
    if let Some(session) = session_id {
        let value = HeaderValue::from_str(session)
            .map_err(|e| Error::Transport(format!("invalid session id: {}", e)))?;
        headers.insert(HeaderName::from_static(SESSION_HEADER), value);
    }
    Ok(headers)
}
