use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use forecastor_core::SandboxConfig;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{truncate_output, ExecOutcome, ImportPolicy, SandboxError, SubmissionGuard};

const RUNNER: &str = include_str!("runner.py");

#[derive(Serialize)]
struct ExecRequest<'a> {
    code: &'a str,
    authorized_imports: &'a [String],
    tables: &'a BTreeMap<String, PathBuf>,
    table_cache: Option<&'a PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RunnerReply {
    Ok {
        #[serde(default)]
        stdout: String,
    },
    Error {
        #[serde(default)]
        stdout: String,
        error: String,
        #[serde(default)]
        traceback: String,
    },
    Denied {
        #[serde(default)]
        stdout: String,
        modules: Vec<String>,
    },
}

/// Runs snippets in a fresh `python3` per call with the competition tables
/// preloaded as pandas DataFrames.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    command: Vec<String>,
    policy: ImportPolicy,
    workspace: PathBuf,
    tables: BTreeMap<String, PathBuf>,
    submission_file: String,
    table_cache: Option<PathBuf>,
    exec_timeout: Option<Duration>,
    max_output_chars: usize,
}

impl PythonSandbox {
    pub fn new(
        config: &SandboxConfig,
        workspace: impl Into<PathBuf>,
        tables: BTreeMap<String, PathBuf>,
    ) -> Result<Self, SandboxError> {
        let workspace = workspace.into();
        if !workspace.is_dir() {
            return Err(SandboxError::Workspace(workspace));
        }

        let command: Vec<String> = config
            .python_command
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if command.is_empty() {
            return Err(SandboxError::InvalidCommand(config.python_command.clone()));
        }

        Ok(Self {
            command,
            policy: ImportPolicy::new(&config.authorized_imports),
            workspace,
            tables,
            submission_file: "submission.csv".to_string(),
            table_cache: None,
            exec_timeout: config.exec_timeout_secs.map(Duration::from_secs),
            max_output_chars: config.max_output_chars,
        })
    }

    pub fn with_submission_file(mut self, name: impl Into<String>) -> Self {
        self.submission_file = name.into();
        self
    }

    /// Directory where parsed tables are pickled after the first load.
    pub fn with_table_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.table_cache = Some(dir.into());
        self
    }

    pub async fn execute(&self, code: &str) -> Result<ExecOutcome, SandboxError> {
        if let Err(modules) = self.policy.check(code) {
            warn!("Rejected snippet importing {:?}", modules);
            return Ok(ExecOutcome::Denied {
                modules,
                logs: String::new(),
            });
        }

        let guard = SubmissionGuard::snapshot(self.workspace.join(&self.submission_file))?;

        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .arg("-c")
            .arg(RUNNER)
            .current_dir(&self.workspace)
            .env("MPLBACKEND", "Agg")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                command: self.command.join(" "),
                source,
            })?;
        debug!("Spawned interpreter pid {:?}", child.id());

        let request = ExecRequest {
            code,
            authorized_imports: self.policy.patterns(),
            tables: &self.tables,
            table_cache: self.table_cache.as_ref(),
        };
        let mut line =
            serde_json::to_vec(&request).map_err(|e| SandboxError::Protocol(e.to_string()))?;
        line.push(b'\n');

        if let Some(mut stdin) = child.stdin.take() {
            // A runner that died on startup shows up below as a missing reply.
            if let Err(e) = stdin.write_all(&line).await {
                debug!("Interpreter stdin closed early: {}", e);
            }
        }

        let output = match self.exec_timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    warn!("Snippet exceeded {}s, interpreter killed", limit.as_secs());
                    drop(guard);
                    return Ok(ExecOutcome::RuntimeError {
                        logs: String::new(),
                        error: format!(
                            "Execution timed out after {}s and was stopped",
                            limit.as_secs()
                        ),
                        traceback: String::new(),
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let reply = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<RunnerReply>(l.trim()));

        let reply = match reply {
            Some(Ok(reply)) if output.status.success() => reply,
            Some(Err(e)) if output.status.success() => {
                return Err(SandboxError::Protocol(format!("{}; raw={}", e, stdout.trim())))
            }
            _ => {
                warn!("Interpreter exited abnormally: {}", output.status);
                drop(guard);
                return Ok(ExecOutcome::RuntimeError {
                    logs: truncate_output(&stdout, self.max_output_chars),
                    error: format!("Interpreter exited abnormally ({})", output.status),
                    traceback: truncate_output(&stderr, self.max_output_chars),
                });
            }
        };
        // Only a snippet that ran to completion may replace the submission.
        let outcome = match reply {
            RunnerReply::Ok { stdout } => {
                guard.commit();
                ExecOutcome::Output {
                    logs: truncate_output(&stdout, self.max_output_chars),
                }
            }
            RunnerReply::Error {
                stdout,
                error,
                traceback,
            } => ExecOutcome::RuntimeError {
                logs: truncate_output(&stdout, self.max_output_chars),
                error,
                traceback: truncate_output(&traceback, self.max_output_chars),
            },
            RunnerReply::Denied { stdout, modules } => ExecOutcome::Denied {
                modules,
                logs: truncate_output(&stdout, self.max_output_chars),
            },
        };
        info!("Snippet finished: success={}", outcome.is_success());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn pandas_available() -> bool {
        std::process::Command::new("python3")
            .args(["-c", "import pandas"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn sandbox(dir: &Path, timeout: Option<u64>) -> PythonSandbox {
        let config = SandboxConfig {
            exec_timeout_secs: timeout,
            ..SandboxConfig::default()
        };
        PythonSandbox::new(&config, dir, BTreeMap::new()).unwrap()
    }

    #[tokio::test]
    async fn test_denied_import_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            python_command: "definitely-not-a-python".into(),
            ..SandboxConfig::default()
        };
        let sandbox = PythonSandbox::new(&config, dir.path(), BTreeMap::new()).unwrap();

        let outcome = sandbox
            .execute("import subprocess\nsubprocess.run(['ls'])")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ExecOutcome::Denied {
                modules: vec!["subprocess".into()],
                logs: String::new()
            }
        );
    }

    #[test]
    fn test_rejects_missing_workspace() {
        let err = PythonSandbox::new(
            &SandboxConfig::default(),
            "/nonexistent/forecastor-workspace",
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::Workspace(_)));
    }

    #[tokio::test]
    async fn test_captures_output_and_last_expression() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let outcome = sandbox(dir.path(), None)
            .execute("import math\nprint('hello')\nmath.floor(2.7)")
            .await
            .unwrap();
        let logs = outcome.logs();
        assert!(outcome.is_success(), "{:?}", outcome);
        assert!(logs.contains("hello"));
        assert!(logs.contains("Out: 2"));
    }

    #[tokio::test]
    async fn test_runtime_error_is_a_value() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let outcome = sandbox(dir.path(), None)
            .execute("print('before')\n1 / 0")
            .await
            .unwrap();
        match outcome {
            ExecOutcome::RuntimeError { logs, error, .. } => {
                assert!(logs.contains("before"));
                assert!(error.contains("ZeroDivisionError"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dynamic_import_caught_by_hook() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let outcome = sandbox(dir.path(), None)
            .execute("mod = __import__('socket')")
            .await
            .unwrap();
        assert!(
            matches!(outcome, ExecOutcome::Denied { ref modules, .. } if modules == &["socket"])
        );
    }

    #[tokio::test]
    async fn test_submission_written_by_snippet() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let code = "with open('submission.csv', 'w') as f:\n    f.write('id,y\\n1,0\\n')";
        let outcome = sandbox(dir.path(), None).execute(code).await.unwrap();
        assert!(outcome.is_success(), "{:?}", outcome);
        assert!(dir.path().join("submission.csv").exists());
    }

    #[tokio::test]
    async fn test_timeout_restores_submission() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");
        std::fs::write(&path, "id,y\n1,0\n").unwrap();

        let code = "with open('submission.csv', 'w') as f:\n    \
                    f.write('id,')\n    f.flush()\n    while True:\n        pass";
        let outcome = sandbox(dir.path(), Some(1)).execute(code).await.unwrap();
        match outcome {
            ExecOutcome::RuntimeError { error, .. } => assert!(error.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,y\n1,0\n");
    }

    #[tokio::test]
    async fn test_failed_snippet_restores_submission() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");
        std::fs::write(&path, "id,y\n1,0\n").unwrap();

        let code = "f = open('submission.csv', 'w')\nf.write('id,')\nf.flush()\n\
                    raise RuntimeError('boom')";
        let outcome = sandbox(dir.path(), None).execute(code).await.unwrap();
        match outcome {
            ExecOutcome::RuntimeError { error, .. } => assert!(error.contains("boom")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,y\n1,0\n");
    }

    #[tokio::test]
    async fn test_denied_at_runtime_restores_submission() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");
        std::fs::write(&path, "id,y\n1,0\n").unwrap();

        let code = "open('submission.csv', 'w').write('x')\n__import__('socket')";
        let outcome = sandbox(dir.path(), None).execute(code).await.unwrap();
        assert!(matches!(outcome, ExecOutcome::Denied { .. }), "{:?}", outcome);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,y\n1,0\n");
    }

    #[tokio::test]
    async fn test_missing_table_reports_load_failure() {
        if !python_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let mut tables = BTreeMap::new();
        tables.insert("train_dataframe".to_string(), dir.path().join("missing.csv"));
        let sandbox = PythonSandbox::new(&SandboxConfig::default(), dir.path(), tables).unwrap();

        let outcome = sandbox.execute("print(1)").await.unwrap();
        match outcome {
            ExecOutcome::RuntimeError { error, .. } => {
                assert!(error.contains("failed to load tables"), "{}", error)
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tables_seeded_as_dataframes() {
        if !pandas_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("train.csv");
        std::fs::write(&csv, "date,y\n2024-01-01,1\n2024-01-02,2\n2024-01-03,3\n").unwrap();
        let mut tables = BTreeMap::new();
        tables.insert("train_dataframe".to_string(), csv);
        let sandbox = PythonSandbox::new(&SandboxConfig::default(), dir.path(), tables).unwrap();

        let outcome = sandbox
            .execute("print(train_dataframe.shape)\nint(train_dataframe['y'].sum())")
            .await
            .unwrap();
        assert!(outcome.is_success(), "{:?}", outcome);
        assert!(outcome.logs().contains("(3, 2)"));
        assert!(outcome.logs().contains("Out: 6"));
    }

    #[tokio::test]
    async fn test_table_cache_reused_between_calls() {
        if !pandas_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let csv = dir.path().join("train.csv");
        std::fs::write(&csv, "id,y\n1,10\n2,20\n").unwrap();
        let mut tables = BTreeMap::new();
        tables.insert("train_dataframe".to_string(), csv.clone());
        let sandbox = PythonSandbox::new(&SandboxConfig::default(), dir.path(), tables)
            .unwrap()
            .with_table_cache(cache.path());

        let first = sandbox.execute("len(train_dataframe)").await.unwrap();
        assert!(first.logs().contains("Out: 2"), "{:?}", first);
        assert!(cache.path().join("train_dataframe.pkl").exists());

        // The second call must not need the source file any more.
        std::fs::remove_file(&csv).unwrap();
        let second = sandbox.execute("len(train_dataframe)").await.unwrap();
        assert!(second.logs().contains("Out: 2"), "{:?}", second);
    }
}
