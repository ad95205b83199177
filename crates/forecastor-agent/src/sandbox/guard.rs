use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::warn;

/// Snapshot of the submission file taken before a snippet runs.
///
/// Dropping the guard without [`commit`](Self::commit) puts the file back the
/// way it was, so a snippet that does not finish cleanly never leaves a
/// partial write.
#[derive(Debug)]
pub struct SubmissionGuard {
    path: PathBuf,
    snapshot: Option<Vec<u8>>,
    armed: bool,
}

impl SubmissionGuard {
    pub fn snapshot(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let snapshot = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            snapshot,
            armed: true,
        })
    }

    /// Keep whatever the snippet wrote.
    pub fn commit(mut self) {
        self.armed = false;
    }

    fn restore(&self) -> io::Result<()> {
        match &self.snapshot {
            Some(bytes) => fs::write(&self.path, bytes),
            None => match fs::remove_file(&self.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }
}

impl Drop for SubmissionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.restore() {
            warn!("Failed to restore {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_restores_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");
        fs::write(&path, "id,y\n1,0\n").unwrap();

        let guard = SubmissionGuard::snapshot(&path).unwrap();
        fs::write(&path, "id,y\n1,").unwrap();
        drop(guard);

        assert_eq!(fs::read_to_string(&path).unwrap(), "id,y\n1,0\n");
    }

    #[test]
    fn test_drop_removes_file_that_did_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");

        let guard = SubmissionGuard::snapshot(&path).unwrap();
        fs::write(&path, "partial").unwrap();
        drop(guard);

        assert!(!path.exists());
    }

    #[test]
    fn test_commit_keeps_new_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");

        let guard = SubmissionGuard::snapshot(&path).unwrap();
        fs::write(&path, "id,y\n1,2\n").unwrap();
        guard.commit();

        assert_eq!(fs::read_to_string(&path).unwrap(), "id,y\n1,2\n");
    }
}
