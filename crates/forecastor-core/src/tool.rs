use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of operations the model may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ExecuteCode,
    ValidateSubmission,
    FinalAnswer,
}

impl ToolKind {
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::ExecuteCode => "write_and_execute_code",
            ToolKind::ValidateSubmission => "validate_submission",
            ToolKind::FinalAnswer => "final_answer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.name() == name)
    }

    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::ExecuteCode,
            ToolKind::ValidateSubmission,
            ToolKind::FinalAnswer,
        ]
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument object as sent by the model.
    pub arguments: String,
}

/// Declared name + JSON schema handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    pub success: bool,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    pub result: ToolOutput,
}

impl ToolInvocationRecord {
    /// Source code argument of a code-execution call, if this is one.
    pub fn code(&self) -> Option<String> {
        if ToolKind::from_name(&self.name) != Some(ToolKind::ExecuteCode) {
            return None;
        }
        serde_json::from_str::<Value>(&self.arguments)
            .ok()?
            .get("code")?
            .as_str()
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub bytes_len: usize,
}

/// One iteration of the agent loop, appended to run memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    #[serde(default)]
    pub model_text: Option<String>,
    pub invocations: Vec<ToolInvocationRecord>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    pub elapsed_ms: f64,
}
