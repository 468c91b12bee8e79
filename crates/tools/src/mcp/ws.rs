//! Persistent WebSocket connection to one MCP server.
//!
//! A writer task owns the sink and drains an outgoing channel; a reader task
//! decodes every inbound frame and routes replies through the shared
//! correlation table. When the socket closes, from either side, every request
//! still waiting on this server is rejected and the connection reports itself
//! as not open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use pagepilot_core::{Error, Result, ServerAuth};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::jsonrpc::parse_inbound;
use super::pending::PendingRequests;

pub struct WsConnection {
    server_id: String,
    ws_tx: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    pending: PendingRequests,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl WsConnection {
    pub async fn connect(
        server_id: &str,
        url: &str,
        auth: Option<&ServerAuth>,
        pending: PendingRequests,
    ) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::Transport(format!("MCP[{}]: invalid WebSocket URL {}: {}", server_id, url, e)))?;
        if let Some(auth) = auth {
            let name = HeaderName::from_bytes(auth.header_name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid auth header name '{}': {}", auth.header_name, e)))?;
            let value = HeaderValue::from_str(&auth.header_value)
                .map_err(|e| Error::Config(format!("invalid auth header value: {}", e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(format!("MCP[{}]: WebSocket connect to {} failed: {}", server_id, url, e)))?;
        info!(server = %server_id, url, "MCP WebSocket connected");

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let open = Arc::new(AtomicBool::new(true));

        let writer_open = open.clone();
        let writer_server = server_id.to_string();
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!(server = %writer_server, error = %e, "MCP WebSocket write error");
                    writer_open.store(false, Ordering::SeqCst);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        let reader_open = open.clone();
        let reader_server = server_id.to_string();
        let reader_pending = pending.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(server = %reader_server, "MCP WebSocket: dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => {
                        debug!(server = %reader_server, "MCP WebSocket closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(server = %reader_server, error = %e, "MCP WebSocket read error");
                        break;
                    }
                };
                debug!(server = %reader_server, "MCP ← {}", crate::safe_truncate(&text, 200));
                for msg in parse_inbound(&text, None) {
                    reader_pending.dispatch(&reader_server, msg).await;
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            let rejected = reader_pending.reject_origin(&reader_server, "WebSocket closed").await;
            if rejected > 0 {
                warn!(server = %reader_server, rejected, "MCP WebSocket closed with requests in flight");
            }
        });

        Ok(Self {
            server_id: server_id.to_string(),
            ws_tx,
            open,
            pending,
            reader_handle,
            writer_handle,
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.reader_handle.is_finished()
    }

    pub async fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Transport(format!("MCP[{}]: WebSocket is not open", self.server_id)));
        }
        self.ws_tx
            .send(text)
            .await
            .map_err(|e| Error::Transport(format!("MCP[{}]: WebSocket send failed: {}", self.server_id, e)))
    }

    /// Stop both tasks and fail every request still waiting on this server.
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader_handle.abort();
        self.writer_handle.abort();
        let rejected = self.pending.reject_origin(&self.server_id, "WebSocket closed").await;
        if rejected > 0 {
            warn!(server = %self.server_id, rejected, "MCP WebSocket closed with requests in flight");
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
