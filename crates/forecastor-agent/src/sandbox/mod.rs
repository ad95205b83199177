//! Restricted Python execution for model-written snippets.
//!
//! Every call spawns a fresh interpreter, so no state leaks between snippets
//! except what the snippet writes to the workspace.

mod guard;
mod imports;
mod python;

pub use guard::SubmissionGuard;
pub use imports::{ImportPolicy, BASE_BUILTIN_MODULES};
pub use python::PythonSandbox;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Invalid interpreter command: {0:?}")]
    InvalidCommand(String),

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workspace is not a directory: {0}")]
    Workspace(PathBuf),

    #[error("Malformed reply from interpreter: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one snippet. Snippet failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecOutcome {
    Output {
        logs: String,
    },
    RuntimeError {
        logs: String,
        error: String,
        traceback: String,
    },
    Denied {
        modules: Vec<String>,
        logs: String,
    },
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecOutcome::Output { .. })
    }

    pub fn logs(&self) -> &str {
        match self {
            ExecOutcome::Output { logs }
            | ExecOutcome::RuntimeError { logs, .. }
            | ExecOutcome::Denied { logs, .. } => logs,
        }
    }

    /// Text handed back to the model.
    pub fn render(&self) -> String {
        match self {
            ExecOutcome::Output { logs } if logs.trim().is_empty() => {
                "Execution logs:\n(no output)".to_string()
            }
            ExecOutcome::Output { logs } => format!("Execution logs:\n{}", logs.trim_end()),
            ExecOutcome::RuntimeError {
                logs,
                error,
                traceback,
            } => {
                let mut text = String::new();
                if !logs.trim().is_empty() {
                    text.push_str(&format!("Execution logs:\n{}\n", logs.trim_end()));
                }
                text.push_str(&format!("Code execution failed: {}", error));
                if !traceback.trim().is_empty() {
                    text.push_str(&format!("\n{}", traceback.trim_end()));
                }
                text
            }
            ExecOutcome::Denied { modules, .. } => format!(
                "Import denied: {}. Only the authorized modules may be imported; \
                 rewrite the code without them.",
                modules.join(", ")
            ),
        }
    }
}

pub(crate) fn truncate_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!(
        "{}\n... (output truncated, {} characters omitted)",
        kept,
        total - max_chars
    )
}
