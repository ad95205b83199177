mod ollama;
mod openai;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use forecastor_core::{Message, Result, ToolCall, ToolSpec};

/// One assistant turn: optional text plus the tool calls it requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelTurn {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelTurn>;
}
