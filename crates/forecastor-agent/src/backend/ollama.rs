use async_trait::async_trait;
use forecastor_core::{ForecastorError, Message, Result, ToolCall, ToolSpec};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ModelBackend, ModelTurn};

#[derive(Debug, Default, Deserialize)]
struct OllamaMetrics {
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    eval_duration: u64,
}

impl OllamaMetrics {
    fn tokens_per_sec(&self) -> f64 {
        if self.eval_duration == 0 {
            return 0.0;
        }
        (self.eval_count as f64) / (self.eval_duration as f64 / 1_000_000_000.0)
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize)]
struct OllamaTool<'a> {
    r#type: &'static str,
    function: OllamaFunction<'a>,
}

#[derive(Debug, Serialize)]
struct OllamaFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaCalledFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaCalledFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaResponseMessage>,
    #[serde(flatten)]
    metrics: OllamaMetrics,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

/// Local models served by Ollama's native `/api/chat`.
pub struct OllamaBackend {
    client: Client,
    api_base: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(model: &str, api_base: &str) -> Self {
        let base = api_base.trim_end_matches('/').replace("/v1", "");

        Self {
            client: Client::new(),
            api_base: base,
            model: model.to_string(),
        }
    }

    fn build_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| match msg {
                Message::System { content } => OllamaMessage {
                    role: "system",
                    content: content.clone(),
                    images: Vec::new(),
                    tool_calls: Vec::new(),
                },
                Message::User { content, images } => OllamaMessage {
                    role: "user",
                    content: content.clone(),
                    images: images.iter().map(|i| i.base64()).collect(),
                    tool_calls: Vec::new(),
                },
                Message::Assistant {
                    content,
                    tool_calls,
                } => OllamaMessage {
                    role: "assistant",
                    content: content.clone().unwrap_or_default(),
                    images: Vec::new(),
                    tool_calls: tool_calls
                        .iter()
                        .map(|call| OllamaToolCall {
                            function: OllamaCalledFunction {
                                name: call.name.clone(),
                                arguments: serde_json::from_str(&call.arguments)
                                    .unwrap_or_else(|_| Value::String(call.arguments.clone())),
                            },
                        })
                        .collect(),
                },
                Message::Tool { content, .. } => OllamaMessage {
                    role: "tool",
                    content: content.clone(),
                    images: Vec::new(),
                    tool_calls: Vec::new(),
                },
            })
            .collect()
    }

    fn parse_turn(message: OllamaResponseMessage) -> ModelTurn {
        // Ollama does not assign call ids.
        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name: call.function.name,
                arguments: match call.function.arguments {
                    Value::String(s) => s,
                    Value::Null => "{}".to_string(),
                    other => other.to_string(),
                },
            })
            .collect();

        ModelTurn {
            content: Some(message.content).filter(|c| !c.trim().is_empty()),
            tool_calls,
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelTurn> {
        let url = format!("{}/api/chat", self.api_base);

        let request = OllamaChatRequest {
            model: &self.model,
            messages: Self::build_messages(messages),
            tools: tools
                .iter()
                .map(|spec| OllamaTool {
                    r#type: "function",
                    function: OllamaFunction {
                        name: &spec.name,
                        description: &spec.description,
                        parameters: &spec.parameters,
                    },
                })
                .collect(),
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ForecastorError::Backend(e.to_string()))?;

        let resp: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ForecastorError::Backend(e.to_string()))?;

        info!(
            "Ollama: {}ms total, {:.1} tok/s, {} eval tokens",
            resp.metrics.total_duration / 1_000_000,
            resp.metrics.tokens_per_sec(),
            resp.metrics.eval_count
        );

        let message = resp
            .message
            .ok_or_else(|| ForecastorError::Backend("Ollama response has no message".into()))?;
        Ok(Self::parse_turn(message))
    }
}
