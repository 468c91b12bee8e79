use pagepilot_core::ActionResult;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::scratchpad::CompletionReason;

/// Progress reported while a run executes, in order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    Observation { step: u32, content: String },
    Thought { step: u32, content: String },
    Action { step: u32, name: String, params: Value },
    Result { step: u32, result: ActionResult },
    #[serde(rename_all = "camelCase")]
    Progress { step: u32, max_steps: u32 },
    #[serde(rename_all = "camelCase")]
    Complete {
        success: bool,
        reason: CompletionReason,
        answer: Option<String>,
    },
    Error { step: u32, message: String },
}

/// Sending half of the event channel. Events sent after the receiver is
/// dropped are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
