use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastorError {
    #[error("Competition not found: {0}")]
    CompetitionNotFound(String),

    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ForecastorError>;
