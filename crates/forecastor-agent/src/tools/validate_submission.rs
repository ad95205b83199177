use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use forecastor_core::{Competition, ForecastorError, Result, ToolKind, ToolOutput, ToolSpec};
use serde_json::{json, Value};

use super::Tool;
use crate::validator::SubmissionValidator;

/// `validate_submission`: structural check of the fixed-path submission file.
pub struct ValidateSubmissionTool {
    validator: Arc<dyn SubmissionValidator>,
    competition: Competition,
    submission: PathBuf,
}

impl ValidateSubmissionTool {
    pub fn new(
        validator: Arc<dyn SubmissionValidator>,
        competition: Competition,
        submission: impl Into<PathBuf>,
    ) -> Self {
        Self {
            validator,
            competition,
            submission: submission.into(),
        }
    }
}

#[async_trait]
impl Tool for ValidateSubmissionTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ValidateSubmission
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: ToolKind::ValidateSubmission.name().to_string(),
            description: "Check that submission.csv has the columns, row count and ids the \
                          competition expects. Takes no arguments."
                .to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _args: &Value) -> Result<ToolOutput> {
        let validator = Arc::clone(&self.validator);
        let competition = self.competition.clone();
        let submission = self.submission.clone();

        // Submissions can run to millions of rows.
        let verdict = tokio::task::spawn_blocking(move || {
            validator.validate(&submission, &competition)
        })
        .await
        .map_err(|e| ForecastorError::Tool(format!("validator task failed: {}", e)))?;

        Ok(ToolOutput {
            text: verdict.message,
            success: verdict.valid,
        })
    }
}
