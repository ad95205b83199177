pub mod backend;
pub mod callback;
pub mod competition_loader;
pub mod driver;
pub mod prompt;
pub mod sandbox;
pub mod tools;
pub mod validator;

pub use backend::{ModelBackend, ModelTurn, OllamaBackend, OpenAiBackend};
pub use callback::{ImageArtifact, PlotHarvester, StepCallback};
pub use competition_loader::CompetitionRegistry;
pub use driver::{AgentDriver, AgentEvent, RunOutcome};
pub use sandbox::{ExecOutcome, ImportPolicy, PythonSandbox, SandboxError};
pub use tools::{ExecuteCodeTool, Tool, ToolRegistry, ValidateSubmissionTool};
pub use validator::{SampleSubmissionValidator, SubmissionValidator, Verdict};
