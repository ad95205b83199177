//! Structural submission checks against the competition's sample submission.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use forecastor_core::Competition;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    pub message: String,
}

impl Verdict {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Read-only: validation never mutates the submission or any on-disk state.
pub trait SubmissionValidator: Send + Sync {
    fn validate(&self, submission: &Path, competition: &Competition) -> Verdict;
}

struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn read(path: &Path) -> Result<Self, String> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| e.to_string())?;
        let headers = reader
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let rows = reader
            .records()
            .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        let idx = self.headers.iter().position(|h| h == name)?;
        Some(self.rows.iter().map(move |r| r.get(idx).map(String::as_str).unwrap_or("")))
    }
}

fn is_numeric(value: &str) -> bool {
    value.trim().parse::<f64>().is_ok()
}

#[derive(Debug, Default)]
pub struct SampleSubmissionValidator;

impl SampleSubmissionValidator {
    pub fn new() -> Self {
        Self
    }

    fn check(&self, submission: &Path, competition: &Competition) -> Verdict {
        if !submission.is_file() {
            return Verdict::fail(format!(
                "Submission file not found at {}",
                submission.display()
            ));
        }

        let sample = match Table::read(&competition.sample_submission) {
            Ok(t) => t,
            Err(e) => return Verdict::fail(format!("Could not read sample submission: {}", e)),
        };
        let sub = match Table::read(submission) {
            Ok(t) => t,
            Err(e) => return Verdict::fail(format!("Submission is not a valid CSV: {}", e)),
        };

        let expected: BTreeSet<&str> = sample.headers.iter().map(String::as_str).collect();
        let actual: BTreeSet<&str> = sub.headers.iter().map(String::as_str).collect();
        if expected != actual {
            let missing: Vec<&str> = expected.difference(&actual).copied().collect();
            let extra: Vec<&str> = actual.difference(&expected).copied().collect();
            return Verdict::fail(format!(
                "Column mismatch. Missing: [{}]. Unexpected: [{}].",
                missing.join(", "),
                extra.join(", ")
            ));
        }

        if sub.rows.len() != sample.rows.len() {
            return Verdict::fail(format!(
                "Row count mismatch: expected {} rows, found {}.",
                sample.rows.len(),
                sub.rows.len()
            ));
        }

        if let Some(id_col) = sample.headers.first() {
            if let (Some(want), Some(got)) = (sample.column(id_col), sub.column(id_col)) {
                let want: HashSet<&str> = want.map(str::trim).collect();
                let got: HashSet<&str> = got.map(str::trim).collect();
                if want != got {
                    let missing = want.difference(&got).count();
                    let unknown = got.difference(&want).count();
                    return Verdict::fail(format!(
                        "Column '{}' does not match the expected ids: {} missing, {} unexpected.",
                        id_col, missing, unknown
                    ));
                }
            }
        }

        for name in sample.headers.iter().skip(1) {
            let numeric = sample
                .column(name)
                .map(|mut vals| vals.all(is_numeric))
                .unwrap_or(false);
            if !numeric {
                continue;
            }
            if let Some(vals) = sub.column(name) {
                let bad = vals.filter(|v| !is_numeric(v)).count();
                if bad > 0 {
                    return Verdict::fail(format!(
                        "Column '{}' must be numeric: {} empty or non-numeric values.",
                        name, bad
                    ));
                }
            }
        }

        Verdict::pass(format!(
            "Submission is valid: {} rows, columns [{}].",
            sub.rows.len(),
            sample.headers.join(", ")
        ))
    }
}

impl SubmissionValidator for SampleSubmissionValidator {
    fn validate(&self, submission: &Path, competition: &Competition) -> Verdict {
        let verdict = self.check(submission, competition);
        info!(
            "Validated {} for {}: valid={}",
            submission.display(),
            competition.id,
            verdict.valid
        );
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn competition(dir: &Path) -> Competition {
        let sample = dir.join("sample_submission.csv");
        fs::write(&sample, "id,pressure\n1,0\n2,0\n3,0\n").unwrap();
        Competition {
            id: "vpp".into(),
            name: "VPP".into(),
            description: String::new(),
            public_dir: dir.to_path_buf(),
            sample_submission: sample,
            leaderboard: vec![],
        }
    }

    fn submit(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("submission.csv");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_valid_submission() {
        let dir = tempfile::tempdir().unwrap();
        let comp = competition(dir.path());
        let path = submit(dir.path(), "pressure,id\n1.5,3\n2.5,1\n3.5,2\n");

        let verdict = SampleSubmissionValidator::new().validate(&path, &comp);
        assert!(verdict.valid, "{}", verdict.message);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let comp = competition(dir.path());
        let verdict =
            SampleSubmissionValidator::new().validate(&dir.path().join("submission.csv"), &comp);
        assert!(!verdict.valid);
        assert!(verdict.message.contains("not found"));
    }

    #[test]
    fn test_column_mismatch_names_columns() {
        let dir = tempfile::tempdir().unwrap();
        let comp = competition(dir.path());
        let path = submit(dir.path(), "id,target\n1,0\n2,0\n3,0\n");

        let verdict = SampleSubmissionValidator::new().validate(&path, &comp);
        assert!(!verdict.valid);
        assert!(verdict.message.contains("pressure"));
        assert!(verdict.message.contains("target"));
    }

    #[test]
    fn test_row_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let comp = competition(dir.path());
        let path = submit(dir.path(), "id,pressure\n1,0\n2,0\n");

        let verdict = SampleSubmissionValidator::new().validate(&path, &comp);
        assert!(!verdict.valid);
        assert!(verdict.message.contains("expected 3 rows, found 2"));
    }

    #[test]
    fn test_ids_and_numeric_values() {
        let dir = tempfile::tempdir().unwrap();
        let comp = competition(dir.path());
        let validator = SampleSubmissionValidator::new();

        let wrong_ids = submit(dir.path(), "id,pressure\n1,0\n2,0\n9,0\n");
        assert!(validator.validate(&wrong_ids, &comp).message.contains("1 missing"));

        let blank = submit(dir.path(), "id,pressure\n1,0\n2,\n3,abc\n");
        let verdict = validator.validate(&blank, &comp);
        assert!(!verdict.valid);
        assert!(verdict.message.contains("2 empty or non-numeric"));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let comp = competition(dir.path());
        let path = submit(dir.path(), "id,pressure\n1,0\n2,0\n");
        let before = fs::read(&path).unwrap();

        let validator = SampleSubmissionValidator::new();
        let first = validator.validate(&path, &comp);
        let second = validator.validate(&path, &comp);
        assert_eq!(first, second);
        assert_eq!(fs::read(&path).unwrap(), before);
    }
}
