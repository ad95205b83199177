use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContentPart, ChatCompletionTool, ChatCompletionToolArgs,
        ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
        ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use forecastor_core::{ForecastorError, Message, ModelConfig, Result, ToolCall, ToolSpec};
use tracing::debug;

use super::{ModelBackend, ModelTurn};

fn llm_err(e: impl ToString) -> ForecastorError {
    ForecastorError::Backend(e.to_string())
}

/// OpenAI-compatible chat completions with function tools.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
}

impl OpenAiBackend {
    pub fn new(config: &ModelConfig) -> Self {
        let mut openai = OpenAIConfig::new();
        if let Some(base) = &config.api_base {
            openai = openai.with_api_base(base);
        }
        Self {
            client: Client::with_config(openai),
            model: config.model_id.clone(),
            temperature: config.temperature,
        }
    }

    fn convert_message(msg: &Message) -> Result<ChatCompletionRequestMessage> {
        let converted = match msg {
            Message::System { content } => ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(content.as_str())
                    .build()
                    .map_err(llm_err)?,
            ),
            Message::User { content, images } if images.is_empty() => {
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(content.as_str())
                        .build()
                        .map_err(llm_err)?,
                )
            }
            Message::User { content, images } => {
                let mut parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(content.as_str())
                        .build()
                        .map_err(llm_err)?,
                )];
                for image in images {
                    parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImageArgs::default()
                            .image_url(
                                ImageUrlArgs::default()
                                    .url(image.data_url())
                                    .build()
                                    .map_err(llm_err)?,
                            )
                            .build()
                            .map_err(llm_err)?,
                    ));
                }
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(parts)
                        .build()
                        .map_err(llm_err)?,
                )
            }
            Message::Assistant {
                content,
                tool_calls,
            } => {
                let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                if let Some(text) = content {
                    args.content(text.as_str());
                }
                if !tool_calls.is_empty() {
                    args.tool_calls(
                        tool_calls
                            .iter()
                            .map(|call| ChatCompletionMessageToolCall {
                                id: call.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.clone(),
                                },
                            })
                            .collect::<Vec<_>>(),
                    );
                }
                ChatCompletionRequestMessage::Assistant(args.build().map_err(llm_err)?)
            }
            Message::Tool { call_id, content } => ChatCompletionRequestMessage::Tool(
                ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(call_id.as_str())
                    .content(content.as_str())
                    .build()
                    .map_err(llm_err)?,
            ),
        };
        Ok(converted)
    }

    fn convert_tool(spec: &ToolSpec) -> Result<ChatCompletionTool> {
        ChatCompletionToolArgs::default()
            .r#type(ChatCompletionToolType::Function)
            .function(
                FunctionObjectArgs::default()
                    .name(spec.name.as_str())
                    .description(spec.description.as_str())
                    .parameters(spec.parameters.clone())
                    .build()
                    .map_err(llm_err)?,
            )
            .build()
            .map_err(llm_err)
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelTurn> {
        let messages = messages
            .iter()
            .map(Self::convert_message)
            .collect::<Result<Vec<_>>>()?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(messages);
        if !tools.is_empty() {
            let tools = tools
                .iter()
                .map(Self::convert_tool)
                .collect::<Result<Vec<_>>>()?;
            request.tools(tools);
        }
        if let Some(temperature) = self.temperature {
            request.temperature(temperature);
        }
        let request = request.build().map_err(llm_err)?;

        let response = self.client.chat().create(request).await.map_err(llm_err)?;
        if let Some(usage) = &response.usage {
            debug!(
                "OpenAI usage: {} prompt, {} completion tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| ForecastorError::Backend("No choices in response".into()))?;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(ModelTurn {
            content: message.content.filter(|c| !c.trim().is_empty()),
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecastor_core::ImageAttachment;

    #[test]
    fn test_converts_every_role() {
        let messages = vec![
            Message::system("rules"),
            Message::user("task"),
            Message::User {
                content: "Here is your plot".into(),
                images: vec![ImageAttachment::png(vec![1, 2, 3])],
            },
            Message::Assistant {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "write_and_execute_code".into(),
                    arguments: r#"{"code":"print(1)"}"#.into(),
                }],
            },
            Message::Tool {
                call_id: "call_1".into(),
                content: "1".into(),
            },
        ];
        let converted: Vec<_> = messages
            .iter()
            .map(OpenAiBackend::convert_message)
            .collect::<Result<_>>()
            .unwrap();
        assert!(matches!(converted[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(converted[2], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(converted[3], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(converted[4], ChatCompletionRequestMessage::Tool(_)));
    }

    #[test]
    fn test_tool_spec_conversion() {
        let spec = ToolSpec {
            name: "validate_submission".into(),
            description: "check".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        };
        let tool = OpenAiBackend::convert_tool(&spec).unwrap();
        assert_eq!(tool.function.name, "validate_submission");
    }
}
