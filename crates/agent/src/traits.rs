use async_trait::async_trait;
use pagepilot_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One think-step request to the model.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Function schemas for every tool in the current catalog.
    pub tools: Vec<Value>,
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest, cancel: &CancellationToken) -> Result<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub html: String,
}

impl PageSnapshot {
    pub fn new(url: &str, title: &str, html: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            html: html.to_string(),
        }
    }
}

#[async_trait]
pub trait PageObserver: Send + Sync {
    async fn observe(&self) -> Result<PageSnapshot>;
}

/// Interactive elements and readable text pulled out of a page's HTML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContext {
    #[serde(default)]
    pub elements: Vec<Value>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub formatted_text: String,
}

#[async_trait]
pub trait ContextExtractor: Send + Sync {
    async fn extract(&self, html: &str) -> Result<ExtractedContext>;
}
