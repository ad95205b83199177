mod execute_code;
mod validate_submission;

pub use execute_code::ExecuteCodeTool;
pub use validate_submission::ValidateSubmissionTool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use forecastor_core::{Result, ToolCall, ToolKind, ToolOutput, ToolSpec};
use serde_json::{json, Value};
use tracing::{debug, warn};

#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn spec(&self) -> ToolSpec;

    async fn execute(&self, args: &Value) -> Result<ToolOutput>;
}

pub fn final_answer_spec() -> ToolSpec {
    ToolSpec {
        name: ToolKind::FinalAnswer.name().to_string(),
        description: "Finish the task. Call this once submission.csv is written and validated, \
                      with a short summary of the approach."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "answer": { "type": "string", "description": "Summary of the final solution" }
            },
            "required": ["answer"]
        }),
    }
}

/// Final-answer text from a `final_answer` call's JSON arguments.
pub fn final_answer_text(arguments: &str) -> String {
    serde_json::from_str::<Value>(arguments)
        .ok()
        .and_then(|v| match v.get("answer") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| arguments.to_string())
}

pub struct ToolRegistry {
    tools: HashMap<ToolKind, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.kind(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Registered tool specs in a stable order, always ending with `final_answer`.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = ToolKind::all()
            .iter()
            .filter_map(|kind| self.tools.get(kind))
            .map(|tool| tool.spec())
            .collect();
        specs.push(final_answer_spec());
        specs
    }

    fn available(&self) -> String {
        self.specs()
            .into_iter()
            .map(|s| s.name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Run one model-requested call. Every failure comes back as text the
    /// model can read, never as an error.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutput {
        let Some(kind) = ToolKind::from_name(&call.name) else {
            warn!("Model requested unknown tool {}", call.name);
            return ToolOutput::failed(format!(
                "Unknown tool '{}'. Available tools: {}",
                call.name,
                self.available()
            ));
        };

        if kind == ToolKind::FinalAnswer {
            return ToolOutput::ok(final_answer_text(&call.arguments));
        }

        let Some(tool) = self.tools.get(&kind) else {
            return ToolOutput::failed(format!(
                "Tool '{}' is not enabled. Available tools: {}",
                call.name,
                self.available()
            ));
        };

        let args: Value = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    return ToolOutput::failed(format!(
                        "Invalid JSON arguments for '{}': {}",
                        call.name, e
                    ))
                }
            }
        };

        debug!("Dispatching {} ({})", call.name, call.id);
        match tool.execute(&args).await {
            Ok(output) => output,
            Err(e) => ToolOutput::failed(format!("Tool '{}' failed: {}", call.name, e)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecastor_core::ForecastorError;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn kind(&self) -> ToolKind {
            ToolKind::ExecuteCode
        }

        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: ToolKind::ExecuteCode.name().into(),
                description: "echo".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(&self, args: &Value) -> Result<ToolOutput> {
            match args.get("code").and_then(Value::as_str) {
                Some(code) => Ok(ToolOutput::ok(code)),
                None => Err(ForecastorError::Tool("missing code".into())),
            }
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new().with(Arc::new(EchoTool))
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_name() {
        let out = registry()
            .dispatch(&call("write_and_execute_code", r#"{"code":"print(1)"}"#))
            .await;
        assert_eq!(out, ToolOutput::ok("print(1)"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_text() {
        let out = registry().dispatch(&call("shell", "{}")).await;
        assert!(!out.success);
        assert!(out.text.contains("Unknown tool 'shell'"));
        assert!(out.text.contains("write_and_execute_code"));
    }

    #[tokio::test]
    async fn test_malformed_arguments_and_tool_errors() {
        let reg = registry();
        let bad_json = reg.dispatch(&call("write_and_execute_code", "{code")).await;
        assert!(bad_json.text.starts_with("Invalid JSON arguments"));

        let missing = reg.dispatch(&call("write_and_execute_code", "")).await;
        assert!(!missing.success);
        assert!(missing.text.contains("missing code"));

        let disabled = reg.dispatch(&call("validate_submission", "{}")).await;
        assert!(disabled.text.contains("not enabled"));
    }

    #[test]
    fn test_specs_end_with_final_answer() {
        let names: Vec<String> = registry().specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["write_and_execute_code", "final_answer"]);
    }

    #[test]
    fn test_final_answer_text() {
        assert_eq!(final_answer_text(r#"{"answer":"done"}"#), "done");
        assert_eq!(final_answer_text("plain"), "plain");
    }
}
