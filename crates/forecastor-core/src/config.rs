use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::budget::Budget;
use crate::error::{ForecastorError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForecastorConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,
    /// OpenAI-compatible base URL; `None` uses the client default.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "gpt-4.1".to_string(),
            api_base: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_steps: u32,
    pub max_duration_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_steps: 500,
            max_duration_secs: 24 * 60 * 60,
        }
    }
}

impl From<&BudgetConfig> for Budget {
    fn from(config: &BudgetConfig) -> Self {
        Budget::new(config.max_steps, Duration::from_secs(config.max_duration_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub python_command: String,
    /// Import patterns on top of the base stdlib set, e.g. `pandas.*`.
    pub authorized_imports: Vec<String>,
    /// Per-snippet limit. `None` leaves snippets bounded only by the run budget.
    #[serde(default)]
    pub exec_timeout_secs: Option<u64>,
    pub max_output_chars: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_command: "python3".to_string(),
            authorized_imports: [
                "pandas.*",
                "numpy.*",
                "matplotlib.*",
                "seaborn.*",
                "scipy.*",
                "sklearn.*",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exec_timeout_secs: None,
            max_output_chars: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub workspace: PathBuf,
    pub submission_file: String,
    pub plot_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            workspace: PathBuf::from("."),
            submission_file: "submission.csv".to_string(),
            plot_file: "plot.png".to_string(),
        }
    }
}

impl PathsConfig {
    pub fn submission_path(&self) -> PathBuf {
        self.workspace.join(&self.submission_file)
    }

    pub fn plot_path(&self) -> PathBuf {
        self.workspace.join(&self.plot_file)
    }
}

impl ForecastorConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                serde_json::from_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(model) = lookup("FORECASTOR_MODEL") {
            self.model.model_id = model;
        }
        if let Some(base) = lookup("OPENAI_BASE_URL") {
            self.model.api_base = Some(base);
        }
        if let Some(dir) = lookup("FORECASTOR_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Some(steps) = lookup("FORECASTOR_MAX_STEPS") {
            self.budget.max_steps = parse_number("FORECASTOR_MAX_STEPS", &steps)?;
        }
        if let Some(secs) = lookup("FORECASTOR_MAX_DURATION_SECS") {
            self.budget.max_duration_secs = parse_number("FORECASTOR_MAX_DURATION_SECS", &secs)?;
        }
        if let Some(python) = lookup("FORECASTOR_PYTHON") {
            self.sandbox.python_command = python;
        }
        Ok(())
    }

    pub fn budget(&self) -> Budget {
        Budget::from(&self.budget)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ForecastorError::Config(format!("Invalid value for {}: {}", key, e)))
}
