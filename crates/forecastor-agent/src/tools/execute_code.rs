use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use forecastor_core::{CompetitionContext, Result, SandboxConfig, ToolKind, ToolOutput, ToolSpec};
use serde_json::{json, Value};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::Tool;
use crate::sandbox::PythonSandbox;

/// `write_and_execute_code`: run a Python snippet against the preloaded
/// `train_dataframe` / `test_dataframe`.
///
/// Tables are parsed from CSV once per tool and pickled into a private cache
/// directory that lives as long as the tool.
pub struct ExecuteCodeTool {
    config: SandboxConfig,
    workspace: PathBuf,
    submission_file: String,
    tables: BTreeMap<String, PathBuf>,
    table_cache: Arc<TempDir>,
}

impl ExecuteCodeTool {
    pub fn new(
        config: SandboxConfig,
        workspace: impl Into<PathBuf>,
        tables: BTreeMap<String, PathBuf>,
    ) -> io::Result<Self> {
        let table_cache = tempfile::Builder::new().prefix("forecastor-tables-").tempdir()?;
        debug!("Table cache at {}", table_cache.path().display());
        Ok(Self {
            config,
            workspace: workspace.into(),
            submission_file: "submission.csv".to_string(),
            tables,
            table_cache: Arc::new(table_cache),
        })
    }

    pub fn for_competition(
        config: SandboxConfig,
        workspace: impl Into<PathBuf>,
        context: &CompetitionContext,
    ) -> io::Result<Self> {
        let tables = BTreeMap::from([
            ("train_dataframe".to_string(), context.train.path.clone()),
            ("test_dataframe".to_string(), context.test.path.clone()),
        ]);
        Self::new(config, workspace, tables)
    }

    pub fn with_submission_file(mut self, name: impl Into<String>) -> Self {
        self.submission_file = name.into();
        self
    }

    fn description(&self) -> String {
        let mut text = String::from(
            "Write Python code and execute it. Returns the printed output. \
             Files are read and written relative to the working directory, so save \
             predictions to submission.csv.",
        );
        if !self.tables.is_empty() {
            let names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
            text.push_str(&format!(
                " The pandas DataFrames {} are already loaded.",
                names.join(" and ")
            ));
        }
        text.push_str(&format!(
            " Authorized imports: {}.",
            self.config.authorized_imports.join(", ")
        ));
        text
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ExecuteCode
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: ToolKind::ExecuteCode.name().to_string(),
            description: self.description(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Python source to execute" }
                },
                "required": ["code"]
            }),
        }
    }

    async fn execute(&self, args: &Value) -> Result<ToolOutput> {
        let Some(code) = args.get("code").and_then(Value::as_str) else {
            return Ok(ToolOutput::failed("Missing required string argument 'code'."));
        };

        let sandbox = match PythonSandbox::new(&self.config, &self.workspace, self.tables.clone())
        {
            Ok(sandbox) => sandbox
                .with_submission_file(&self.submission_file)
                .with_table_cache(self.table_cache.path()),
            Err(e) => {
                warn!("Sandbox construction failed: {}", e);
                return Ok(ToolOutput::failed(format!("Code execution unavailable: {}", e)));
            }
        };

        info!("Executing {} bytes of Python", code.len());
        match sandbox.execute(code).await {
            Ok(outcome) => Ok(ToolOutput {
                text: outcome.render(),
                success: outcome.is_success(),
            }),
            Err(e) => {
                warn!("Sandbox failure: {}", e);
                Ok(ToolOutput::failed(format!("Code execution unavailable: {}", e)))
            }
        }
    }
}
