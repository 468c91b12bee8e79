use async_trait::async_trait;
use pagepilot_core::{ActionResult, ToolDescriptor};
use serde_json::Value;

/// Executes native browser actions in the live page.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Actions this executor understands.
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    async fn execute(&self, name: &str, params: &Value) -> ActionResult;

    /// Whether a different approach exists for `name` after a failure.
    fn supports_alternate(&self, _name: &str) -> bool {
        false
    }

    /// Second attempt using a different approach, informed by the errors so far.
    async fn execute_alternate(&self, name: &str, _params: &Value, _trail: &[String]) -> ActionResult {
        ActionResult::failure(format!("No alternate approach for '{}'", name))
    }
}
