use std::path::PathBuf;

use forecastor_core::{ImageAttachment, StepRecord, ToolKind};
use tracing::{debug, warn};

/// An image produced during a step, handed back to the model on the next turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub path: PathBuf,
    pub image: ImageAttachment,
}

/// Hook run after every step. Returning `None` is the common case.
pub trait StepCallback: Send + Sync {
    fn after_step(&self, step: &StepRecord) -> Option<ImageArtifact>;
}

/// Picks up the plot file a code snippet wrote and removes it so it is only
/// attached once.
pub struct PlotHarvester {
    path: PathBuf,
}

impl PlotHarvester {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

impl StepCallback for PlotHarvester {
    fn after_step(&self, step: &StepRecord) -> Option<ImageArtifact> {
        let name = self.file_name();
        if name.is_empty() {
            return None;
        }

        let mentioned = step.invocations.iter().any(|inv| {
            ToolKind::from_name(&inv.name) == Some(ToolKind::ExecuteCode)
                && inv.code().is_some_and(|code| code.contains(&name))
        });
        if !mentioned || !self.path.is_file() {
            return None;
        }

        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove {}: {}", self.path.display(), e);
        }

        debug!("Harvested {} ({} bytes) at step {}", name, bytes.len(), step.step);
        Some(ImageArtifact {
            path: self.path.clone(),
            image: ImageAttachment::png(bytes),
        })
    }
}
