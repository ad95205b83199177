//! Resolves competition ids against the on-disk prepared-data layout:
//!
//! ```text
//! <data_dir>/<id>/leaderboard.csv
//! <data_dir>/<id>/prepared/public/{description.md, sample_submission.csv, train.csv, test.csv}
//! ```

use std::path::{Path, PathBuf};

use forecastor_core::competition::preview;
use forecastor_core::{
    Competition, CompetitionContext, ForecastorError, Result, TableInfo, SAMPLE_PREVIEW_CHARS,
};
use tracing::{debug, info};

pub struct CompetitionRegistry {
    data_dir: PathBuf,
}

impl CompetitionRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn public_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join(id).join("prepared").join("public")
    }

    pub fn get_competition(&self, id: &str) -> Result<Competition> {
        let public_dir = self.public_dir(id);
        if !public_dir.is_dir() {
            return Err(ForecastorError::CompetitionNotFound(id.to_string()));
        }

        let sample_submission = public_dir.join("sample_submission.csv");
        if !sample_submission.is_file() {
            return Err(ForecastorError::CompetitionNotFound(format!(
                "{} (missing sample_submission.csv)",
                id
            )));
        }

        let description = match std::fs::read_to_string(public_dir.join("description.md")) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let name = heading(&description).unwrap_or_else(|| id.to_string());

        let leaderboard = read_leaderboard(&self.data_dir.join(id).join("leaderboard.csv"))?;
        debug!("Competition {}: {} leaderboard rows", id, leaderboard.len());

        Ok(Competition {
            id: id.to_string(),
            name,
            description,
            public_dir,
            sample_submission,
            leaderboard,
        })
    }

    /// Ids with a prepared public directory, sorted.
    pub fn list_competitions(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            if self.public_dir(&id).is_dir() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn load_context(&self, competition: &Competition) -> Result<CompetitionContext> {
        let train = TableInfo::scan("train", &competition.public_dir.join("train.csv"))?;
        let test = TableInfo::scan("test", &competition.public_dir.join("test.csv"))?;
        let sample = std::fs::read_to_string(&competition.sample_submission)?;

        info!(
            "Loaded {}: train {}x{}, test {}x{}",
            competition.id,
            train.row_count,
            train.columns.len(),
            test.row_count,
            test.columns.len()
        );

        Ok(CompetitionContext {
            competition: competition.clone(),
            train,
            test,
            sample_submission_preview: preview(&sample, SAMPLE_PREVIEW_CHARS),
        })
    }
}

fn heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|h| !h.is_empty())
}

fn read_leaderboard(path: &Path) -> Result<Vec<f64>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let score_idx = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == "score")
        .ok_or_else(|| {
            ForecastorError::Config(format!("{} has no score column", path.display()))
        })?;

    let mut scores = Vec::new();
    for record in reader.records() {
        let record = record?;
        // Blank scores show up for teams that never submitted.
        if let Some(score) = record.get(score_idx).and_then(|s| s.trim().parse().ok()) {
            scores.push(score);
        }
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_competition(root: &Path, id: &str, with_leaderboard: bool) {
        let public = root.join(id).join("prepared").join("public");
        fs::create_dir_all(&public).unwrap();
        fs::write(
            public.join("description.md"),
            "# Ventilator Pressure Prediction\n\nPredict airway pressure.\n",
        )
        .unwrap();
        fs::write(public.join("sample_submission.csv"), "id,pressure\n1,0\n2,0\n").unwrap();
        fs::write(
            public.join("train.csv"),
            "id,u_in,pressure\n1,0.1,5.0\n2,0.2,5.5\n3,0.3,6.0\n",
        )
        .unwrap();
        fs::write(public.join("test.csv"), "id,u_in\n1,0.1\n2,0.2\n").unwrap();
        if with_leaderboard {
            fs::write(
                root.join(id).join("leaderboard.csv"),
                "teamName,score\nalpha,0.104\nbeta,0.11\ngamma,\n",
            )
            .unwrap();
        }
    }

    #[test]
    fn test_get_competition_reads_name_and_leaderboard() {
        let dir = tempfile::tempdir().unwrap();
        write_competition(dir.path(), "vpp", true);

        let registry = CompetitionRegistry::new(dir.path());
        let comp = registry.get_competition("vpp").unwrap();
        assert_eq!(comp.name, "Ventilator Pressure Prediction");
        assert_eq!(comp.leaderboard, vec![0.104, 0.11]);
    }

    #[test]
    fn test_missing_leaderboard_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_competition(dir.path(), "vpp", false);

        let comp = CompetitionRegistry::new(dir.path()).get_competition("vpp").unwrap();
        assert!(comp.leaderboard.is_empty());
    }

    #[test]
    fn test_unknown_competition() {
        let dir = tempfile::tempdir().unwrap();
        let err = CompetitionRegistry::new(dir.path())
            .get_competition("nope")
            .unwrap_err();
        assert!(matches!(err, ForecastorError::CompetitionNotFound(_)));
    }

    #[test]
    fn test_load_context_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        write_competition(dir.path(), "vpp", true);
        write_competition(dir.path(), "abc", false);
        fs::create_dir_all(dir.path().join("raw-only")).unwrap();

        let registry = CompetitionRegistry::new(dir.path());
        assert_eq!(registry.list_competitions().unwrap(), vec!["abc", "vpp"]);

        let comp = registry.get_competition("vpp").unwrap();
        let ctx = registry.load_context(&comp).unwrap();
        assert_eq!(ctx.train.row_count, 3);
        assert_eq!(ctx.test.columns, vec!["id", "u_in"]);
        assert!(ctx.sample_submission_preview.starts_with("id,pressure"));
    }
}
