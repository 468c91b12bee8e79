use std::sync::Arc;

use pagepilot_core::{ActionResult, ToolId};
use pagepilot_tools::{ActionExecutor, ProtocolClient, RetryOutcome, RetryPolicy, ToolCatalog};
use serde_json::Value;
use tracing::{debug, warn};

/// Routes a decided action to the native executor or an MCP server, through
/// the retry policy.
pub struct Dispatcher {
    protocol: Arc<ProtocolClient>,
    executor: Arc<dyn ActionExecutor>,
    retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    /// `None` when the name could not be routed.
    pub id: Option<ToolId>,
    pub outcome: RetryOutcome,
}

impl Dispatcher {
    pub fn new(protocol: Arc<ProtocolClient>, executor: Arc<dyn ActionExecutor>, retry: RetryPolicy) -> Self {
        Self {
            protocol,
            executor,
            retry,
        }
    }

    pub fn protocol(&self) -> &Arc<ProtocolClient> {
        &self.protocol
    }

    pub fn executor(&self) -> &Arc<dyn ActionExecutor> {
        &self.executor
    }

    pub async fn dispatch(&self, catalog: &ToolCatalog, name: &str, params: &Value) -> Dispatched {
        let id = match catalog.route(name) {
            Ok(id) => id,
            Err(e) => {
                warn!(action = name, error = %e, "Cannot route action");
                return Dispatched {
                    id: None,
                    outcome: RetryOutcome {
                        result: ActionResult::failure(e.to_string()),
                        attempts: 1,
                        dismissed: 0,
                    },
                };
            }
        };
        debug!(action = name, tool_id = %id, "Dispatching action");

        let outcome = match &id {
            ToolId::Mcp { .. } => {
                let primary = self.protocol.invoke(&id, params.clone());
                self.retry.execute_remote(name, primary).await
            }
            ToolId::Native { name: action } => {
                let primary = self.executor.execute(action, params);
                let alternate = if self.executor.supports_alternate(action) {
                    let executor = self.executor.clone();
                    let action = action.clone();
                    let params = params.clone();
                    Some(move |trail: Vec<String>| async move {
                        executor.execute_alternate(&action, &params, &trail).await
                    })
                } else {
                    None
                };
                self.retry.execute(name, primary, alternate).await
            }
        };

        Dispatched { id: Some(id), outcome }
    }
}
