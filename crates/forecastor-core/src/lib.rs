// Domain modules
pub mod budget;
pub mod catalog;
pub mod competition;
pub mod config;
pub mod error;
pub mod message;
pub mod tool;

pub use budget::{Budget, BudgetTracker, TerminationReason};
pub use catalog::{
    distinct_categories, filter_competitions, load_catalog, load_catalog_path, CatalogEntry,
    DEFAULT_CATEGORIES, DEFAULT_SIZE_CEILING_GB,
};
pub use competition::{Competition, CompetitionContext, TableInfo, SAMPLE_PREVIEW_CHARS};
pub use config::{BudgetConfig, ForecastorConfig, ModelConfig, PathsConfig, SandboxConfig};
pub use error::{ForecastorError, Result};
pub use message::{ImageAttachment, Message};
pub use tool::{
    ArtifactRef, StepRecord, ToolCall, ToolInvocationRecord, ToolKind, ToolOutput, ToolSpec,
};
