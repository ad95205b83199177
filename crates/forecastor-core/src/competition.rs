use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Number of sample-submission characters shown to the model.
pub const SAMPLE_PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub public_dir: PathBuf,
    pub sample_submission: PathBuf,
    /// Leaderboard scores in file order.
    #[serde(default)]
    pub leaderboard: Vec<f64>,
}

/// Shape of a CSV table; the rows themselves stay on disk for the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub path: PathBuf,
    pub columns: Vec<String>,
    pub row_count: usize,
}

impl TableInfo {
    pub fn scan(name: &str, path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let columns = reader.headers()?.iter().map(str::to_string).collect();

        let mut row_count = 0;
        let mut record = csv::ByteRecord::new();
        while reader.read_byte_record(&mut record)? {
            row_count += 1;
        }

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            columns,
            row_count,
        })
    }
}

/// Everything the driver needs about one competition. Not mutated during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionContext {
    pub competition: Competition,
    pub train: TableInfo,
    pub test: TableInfo,
    pub sample_submission_preview: String,
}

impl CompetitionContext {
    pub fn leaderboard_head(&self, n: usize) -> &[f64] {
        let lb = &self.competition.leaderboard;
        &lb[..lb.len().min(n)]
    }
}

/// First `max_chars` characters, never splitting a UTF-8 sequence.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
