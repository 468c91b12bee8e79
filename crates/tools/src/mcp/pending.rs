use std::collections::HashMap;
use std::sync::Arc;

use pagepilot_core::{Error, Result};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::jsonrpc::JsonRpcResponse;

struct Pending {
    tx: oneshot::Sender<Result<Value>>,
    /// Server id the request was sent to.
    origin: String,
}

/// Correlation table: message id → waiting caller.
///
/// Every path that settles a request removes its entry under the lock, so an
/// id is settled at most once whichever of response, timeout or teardown
/// comes first.
#[derive(Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<u64, Pending>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, id: u64, origin: &str) -> oneshot::Receiver<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        let mut map = self.inner.lock().await;
        map.insert(
            id,
            Pending {
                tx,
                origin: origin.to_string(),
            },
        );
        rx
    }

    /// Settle `id` with `outcome`. Returns false when nothing was waiting.
    pub async fn resolve(&self, id: u64, outcome: Result<Value>) -> bool {
        let entry = self.inner.lock().await.remove(&id);
        match entry {
            Some(pending) => {
                // The caller may already have given up; that is not an error.
                let _ = pending.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Route one inbound message to its waiter. Unmatched messages are dropped.
    pub async fn dispatch(&self, origin: &str, msg: JsonRpcResponse) -> bool {
        if !msg.is_reply() {
            debug!(server = %origin, method = ?msg.method, "MCP ← notification dropped");
            return false;
        }
        let Some(id) = msg.correlation_id() else {
            warn!(server = %origin, id = ?msg.id, "MCP ← reply without usable id dropped");
            return false;
        };
        let matched = self.resolve(id, msg.into_result()).await;
        if !matched {
            warn!(server = %origin, id, "MCP ← unmatched reply dropped");
        }
        matched
    }

    /// Forget `id` without settling it (timeout path).
    pub async fn evict(&self, id: u64) -> bool {
        self.inner.lock().await.remove(&id).is_some()
    }

    /// Guard that evicts `id` if the caller is dropped before settling it.
    pub fn evict_on_drop(&self, id: u64) -> EvictGuard {
        EvictGuard {
            pending: Some(self.clone()),
            id,
        }
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.inner.lock().await.contains_key(&id)
    }

    /// Fail every request sent to `origin`.
    pub async fn reject_origin(&self, origin: &str, reason: &str) -> usize {
        let mut map = self.inner.lock().await;
        let ids: Vec<u64> = map
            .iter()
            .filter(|(_, p)| p.origin == origin)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(pending) = map.remove(id) {
                let _ = pending
                    .tx
                    .send(Err(Error::Transport(format!("MCP[{}]: {}", origin, reason))));
            }
        }
        ids.len()
    }

    pub async fn reject_all(&self, reason: &str) -> usize {
        let mut map = self.inner.lock().await;
        let count = map.len();
        for (_, pending) in map.drain() {
            let _ = pending
                .tx
                .send(Err(Error::Transport(format!("MCP[{}]: {}", pending.origin, reason))));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub struct EvictGuard {
    pending: Option<PendingRequests>,
    id: u64,
}

impl EvictGuard {
    pub fn disarm(mut self) {
        self.pending = None;
    }
}

impl Drop for EvictGuard {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if pending.evict(id).await {
                    debug!(id, "MCP request abandoned by caller");
                }
            });
        }
    }
}
